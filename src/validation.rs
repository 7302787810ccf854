//! Input validation for process templates and cutting outputs
//!
//! Templates are validated once at registration; a template that passes can be
//! materialized into bundles without further checks.

use crate::constants::system::{MAX_BUNDLE_PIECES, MAX_TEMPLATE_STEPS};
use crate::error::{FlowError, Result};
use crate::models::{CuttingOutput, ProcessStepDefinition};
use std::collections::BTreeSet;

/// Validates a template's step list and dependency graph
///
/// Every prerequisite must name an existing step with a strictly smaller step
/// number, which makes forward references and cycles unrepresentable.
pub fn validate_template(garment_type: &str, steps: &[ProcessStepDefinition]) -> Result<()> {
    if garment_type.trim().is_empty() {
        return Err(FlowError::InvalidTemplate(
            "Garment type must not be blank".to_string(),
        ));
    }

    if steps.is_empty() {
        return Err(FlowError::InvalidTemplate(format!(
            "Template '{garment_type}' has no steps"
        )));
    }

    if steps.len() > MAX_TEMPLATE_STEPS {
        return Err(FlowError::InvalidTemplate(format!(
            "Template '{garment_type}' has {} steps (max: {MAX_TEMPLATE_STEPS})",
            steps.len()
        )));
    }

    let mut seen = BTreeSet::new();
    for step in steps {
        if step.step_number == 0 {
            return Err(FlowError::InvalidTemplate(format!(
                "Template '{garment_type}': step numbers start at 1"
            )));
        }
        if !seen.insert(step.step_number) {
            return Err(FlowError::InvalidTemplate(format!(
                "Template '{garment_type}': duplicate step number {}",
                step.step_number
            )));
        }
    }

    for step in steps {
        validate_step_fields(garment_type, step)?;

        for prereq in &step.prerequisites {
            if *prereq >= step.step_number {
                return Err(FlowError::InvalidTemplate(format!(
                    "Template '{garment_type}': step {} depends on step {prereq}, \
                     prerequisites must have a lower step number",
                    step.step_number
                )));
            }
            if !seen.contains(prereq) {
                return Err(FlowError::InvalidTemplate(format!(
                    "Template '{garment_type}': step {} depends on unknown step {prereq}",
                    step.step_number
                )));
            }
        }
    }

    Ok(())
}

fn validate_step_fields(garment_type: &str, step: &ProcessStepDefinition) -> Result<()> {
    if step.operation.trim().is_empty() {
        return Err(FlowError::InvalidTemplate(format!(
            "Template '{garment_type}': step {} has a blank operation",
            step.step_number
        )));
    }
    if step.machine_type.trim().is_empty() {
        return Err(FlowError::InvalidTemplate(format!(
            "Template '{garment_type}': step {} has a blank machine type",
            step.step_number
        )));
    }
    validate_price(step.price_per_piece).map_err(|e| {
        FlowError::InvalidTemplate(format!(
            "Template '{garment_type}': step {}: {e}",
            step.step_number
        ))
    })?;
    if !step.estimated_minutes.is_finite() || step.estimated_minutes < 0.0 {
        return Err(FlowError::InvalidTemplate(format!(
            "Template '{garment_type}': step {} has invalid estimated minutes {}",
            step.step_number, step.estimated_minutes
        )));
    }
    Ok(())
}

/// Piece rates must be finite and non-negative
pub fn validate_price(price_per_piece: f64) -> Result<()> {
    if !price_per_piece.is_finite() || price_per_piece < 0.0 {
        return Err(FlowError::ValidationError(format!(
            "Invalid price per piece: {price_per_piece}"
        )));
    }
    Ok(())
}

/// Validates a cutting output before any bundle is materialized
pub fn validate_cutting_output(output: &CuttingOutput) -> Result<()> {
    require_non_blank("lot number", &output.lot_number)?;
    require_non_blank("article number", &output.article_number)?;
    require_non_blank("garment type", &output.garment_type)?;

    if output.color_size_breakdown.is_empty() {
        return Err(FlowError::ValidationError(format!(
            "Cutting output for lot {} has no color/size rows",
            output.lot_number
        )));
    }

    for row in &output.color_size_breakdown {
        require_non_blank("color", &row.color)?;
        require_non_blank("size", &row.size)?;
        if row.pieces == 0 || row.pieces > MAX_BUNDLE_PIECES {
            return Err(FlowError::ValidationError(format!(
                "Lot {} {}/{}: pieces must be between 1 and {MAX_BUNDLE_PIECES}, got {}",
                output.lot_number, row.color, row.size, row.pieces
            )));
        }
    }

    Ok(())
}

fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FlowError::ValidationError(format!(
            "{field} must not be blank"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, deps: &[u32]) -> ProcessStepDefinition {
        ProcessStepDefinition::new(n, format!("op{n}"), "single_needle")
            .with_prerequisites(deps.iter().copied())
    }

    #[test]
    fn test_valid_diamond_template() {
        let steps = vec![step(1, &[]), step(2, &[1]), step(3, &[1]), step(4, &[2, 3])];
        assert!(validate_template("tee", &steps).is_ok());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let steps = vec![step(1, &[2]), step(2, &[])];
        let err = validate_template("tee", &steps).unwrap_err();
        assert!(matches!(err, FlowError::InvalidTemplate(_)));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let steps = vec![step(1, &[]), step(2, &[2])];
        assert!(validate_template("tee", &steps).is_err());
    }

    #[test]
    fn test_unknown_prerequisite_rejected() {
        let steps = vec![step(1, &[]), step(3, &[2])];
        let err = validate_template("tee", &steps).unwrap_err();
        assert!(err.to_string().contains("unknown step 2"));
    }

    #[test]
    fn test_duplicate_and_zero_step_numbers_rejected() {
        assert!(validate_template("tee", &[step(1, &[]), step(1, &[])]).is_err());
        assert!(validate_template("tee", &[step(0, &[])]).is_err());
        assert!(validate_template("tee", &[]).is_err());
        assert!(validate_template(" ", &[step(1, &[])]).is_err());
    }

    #[test]
    fn test_negative_price_rejected() {
        let steps = vec![step(1, &[]).with_price(-1.0)];
        assert!(validate_template("tee", &steps).is_err());
        assert!(validate_price(f64::NAN).is_err());
        assert!(validate_price(0.0).is_ok());
    }

    #[test]
    fn test_cutting_output_validation() {
        let ok = CuttingOutput::new("LOT1", "ART1", "polo").with_row("RED", "M", 10);
        assert!(validate_cutting_output(&ok).is_ok());

        let empty = CuttingOutput::new("LOT1", "ART1", "polo");
        assert!(validate_cutting_output(&empty).is_err());

        let zero = CuttingOutput::new("LOT1", "ART1", "polo").with_row("RED", "M", 0);
        assert!(validate_cutting_output(&zero).is_err());

        let blank_lot = CuttingOutput::new("", "ART1", "polo").with_row("RED", "M", 10);
        assert!(validate_cutting_output(&blank_lot).is_err());
    }
}
