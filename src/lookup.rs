//! Value lookup by name.

use crate::container::HiveContainer;
use crate::error::{ContainerContext, Result};
use crate::tree::{NodeId, ValueId};

/// Returns the first value of `node` named exactly `name`.
///
/// A missing value is `Ok(None)`; only container failures are errors.
pub fn find_value<C>(hive: &C, node: NodeId, name: &str) -> Result<Option<ValueId>>
where
    C: HiveContainer + ?Sized,
{
    let values = hive
        .values(node)
        .context_with(|| format!("failed to list values of {}", node))?;

    for value in values {
        let value_name = hive
            .value_name(value)
            .context_with(|| format!("failed to read name of {}", value))?;
        if value_name == name {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::RawValue;
    use crate::Hive;

    #[test]
    fn test_find_value() {
        let mut hive = Hive::in_memory();
        let root = hive.root().unwrap();
        hive.set_value(root, RawValue::new("", 1, vec![0, 0])).unwrap();
        hive.set_value(root, RawValue::new("Name", 4, vec![1, 0, 0, 0])).unwrap();

        let found = find_value(&hive, root, "Name").unwrap().unwrap();
        assert_eq!(hive.value(found).unwrap().data_type, 4);
        assert!(find_value(&hive, root, "").unwrap().is_some());
        assert!(find_value(&hive, root, "name").unwrap().is_none());
    }
}
