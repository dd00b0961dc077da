//! Component flattening.
//!
//! An observation may carry several measurements taken at the same
//! instant in its `component` list. Each component becomes its own
//! record, inheriting the parent's fields.

use crate::models::{Component, FlatObservation, Observation};
use tracing::debug;

/// Expand every observation with components into one record per component.
///
/// Records without components (or with an empty list) pass through
/// unchanged. Input order is preserved, and records derived from the same
/// parent stay contiguous in component order.
pub fn flatten(observations: Vec<Observation>) -> Vec<FlatObservation> {
    let mut flat = Vec::with_capacity(observations.len());

    for mut observation in observations {
        if !observation.has_components() {
            flat.push(FlatObservation::from(observation));
            continue;
        }

        let components = observation.component.take().unwrap_or_default();
        debug!(
            "Expanding {} components of {}",
            components.len(),
            observation.id.as_deref().unwrap_or("unnamed observation")
        );
        flat.extend(
            components
                .into_iter()
                .map(|component| merge_component(&observation, component)),
        );
    }

    flat
}

/// Overlay a component on its parent. Fields set on the component win.
fn merge_component(parent: &Observation, component: Component) -> FlatObservation {
    let mut extra = parent.extra.clone();
    extra.extend(component.extra);
    // Nested components are not expanded.
    extra.remove("component");

    FlatObservation {
        id: component.id.or_else(|| parent.id.clone()),
        code: component.code.or_else(|| parent.code.clone()),
        effective_date_time: component
            .effective_date_time
            .or_else(|| parent.effective_date_time.clone()),
        value_quantity: component
            .value_quantity
            .or_else(|| parent.value_quantity.clone()),
        extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quantity;
    use serde_json::{json, Value};

    fn quantity(value: f64) -> Option<Quantity> {
        Some(Quantity {
            value: Some(value),
            unit: Some("L/min".to_string()),
            ..Default::default()
        })
    }

    fn observation(id: &str, date: &str, value: Option<f64>) -> Observation {
        Observation {
            id: Some(id.to_string()),
            effective_date_time: Some(date.to_string()),
            value_quantity: value.and_then(quantity),
            ..Default::default()
        }
    }

    fn component(value: f64) -> Component {
        Component {
            value_quantity: quantity(value),
            ..Default::default()
        }
    }

    #[test]
    fn test_flatten_without_components_is_identity() {
        let observations = vec![
            observation("a", "2024-01-15", Some(100.0)),
            observation("b", "2024-01-20", None),
        ];

        let flat = flatten(observations.clone());

        assert_eq!(flat.len(), observations.len());
        for (original, flat) in observations.iter().zip(&flat) {
            assert_eq!(
                serde_json::to_value(original).unwrap(),
                serde_json::to_value(flat).unwrap()
            );
        }
    }

    #[test]
    fn test_flatten_components_inherit_parent() {
        let mut parent = observation("bp", "2024-02-02T09:30:00Z", None);
        parent.component = Some(vec![component(5.0), component(7.0)]);

        let flat = flatten(vec![parent]);

        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].value(), Some(5.0));
        assert_eq!(flat[1].value(), Some(7.0));
        for record in &flat {
            assert_eq!(
                record.effective_date_time.as_deref(),
                Some("2024-02-02T09:30:00Z")
            );
            assert_eq!(record.id.as_deref(), Some("bp"));
        }
    }

    #[test]
    fn test_component_fields_win() {
        let mut parent = observation("p", "2024-02-02", Some(1.0));
        parent.code = Some(json!({"text": "parent"}));
        parent.extra.insert("status".to_string(), json!("final"));
        parent.extra.insert("note".to_string(), json!("parent note"));

        let mut child = component(9.0);
        child.code = Some(json!({"text": "child"}));
        child.extra.insert("note".to_string(), json!("child note"));
        child.extra.insert("component".to_string(), json!([{"valueQuantity": {"value": 3}}]));
        parent.component = Some(vec![child]);

        let flat = flatten(vec![parent]);

        assert_eq!(flat.len(), 1);
        let record = &flat[0];
        assert_eq!(record.value(), Some(9.0));
        assert_eq!(record.code, Some(json!({"text": "child"})));
        assert_eq!(record.extra.get("note"), Some(&Value::from("child note")));
        assert_eq!(record.extra.get("status"), Some(&Value::from("final")));
        assert!(!record.extra.contains_key("component"));
    }

    #[test]
    fn test_component_without_value_inherits_parent_value() {
        let mut parent = observation("p", "2024-02-02", Some(42.0));
        parent.component = Some(vec![Component::default()]);

        let flat = flatten(vec![parent]);
        assert_eq!(flat[0].value(), Some(42.0));
    }

    #[test]
    fn test_flatten_count_law_and_order() {
        let mut multi = observation("multi", "2024-03-01", None);
        multi.component = Some(vec![component(1.0), component(2.0), component(3.0)]);

        let mut empty = observation("empty", "2024-03-02", Some(4.0));
        empty.component = Some(vec![]);

        let observations = vec![
            observation("first", "2024-02-28", Some(0.5)),
            multi,
            empty,
        ];

        let expected: usize = observations
            .iter()
            .map(|o| o.component.as_ref().filter(|c| !c.is_empty()).map_or(1, Vec::len))
            .sum();

        let flat = flatten(observations);

        assert_eq!(flat.len(), expected);
        let values: Vec<_> = flat.iter().map(|r| r.value()).collect();
        assert_eq!(
            values,
            vec![Some(0.5), Some(1.0), Some(2.0), Some(3.0), Some(4.0)]
        );
    }
}
