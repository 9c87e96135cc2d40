//! `reloadable-config print`: load the configuration once and print it.

use serde_json::Value;

use crate::bootstrap::Registries;
use crate::cli::{OutputFormat, PrintArgs};
use crate::error::ConfigError;
use crate::tree::ConfigTree;

pub async fn execute(args: &PrintArgs) -> Result<(), ConfigError> {
    let bootstrap = super::prepare(&args.query).await?;
    let query = args.query.query()?;
    let config = bootstrap.build(&Registries::builtin(), query)?;

    let result = config.get_or_refresh().await;
    config.close();
    let tree = result?;

    let value = select(&tree, args.query.path.as_deref())?;
    match args.format {
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            println!("{rendered}");
        }
        OutputFormat::Flat => {
            for line in flatten(&value, args.query.path.as_deref().unwrap_or_default()) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

/// The whole tree, or the value at `path`.
pub(crate) fn select(tree: &ConfigTree, path: Option<&str>) -> Result<Value, ConfigError> {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(tree.to_value()),
        Some(path) => tree.get(path).cloned().ok_or_else(|| ConfigError::Extract {
            path: path.to_string(),
            message: "no value at this path".into(),
        }),
    }
}

/// `dotted.path = value` lines for every leaf, in key order.
pub(crate) fn flatten(value: &Value, prefix: &str) -> Vec<String> {
    let mut lines = Vec::new();
    flatten_into(value, prefix, &mut lines);
    lines
}

fn flatten_into(value: &Value, prefix: &str, lines: &mut Vec<String>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, item) in map {
                flatten_into(item, &join(key), lines);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(item, &join(&index.to_string()), lines);
            }
        }
        leaf => lines.push(format!("{prefix} = {leaf}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_values() {
        let value = json!({"db": {"hosts": ["a", "b"], "port": 5432}, "debug": false});
        assert_eq!(
            flatten(&value, ""),
            vec![
                "db.hosts.0 = \"a\"",
                "db.hosts.1 = \"b\"",
                "db.port = 5432",
                "debug = false",
            ]
        );
    }

    #[test]
    fn select_reports_missing_path() {
        let tree = ConfigTree::from_value(json!({"a": {"b": 1}})).unwrap();
        assert_eq!(select(&tree, Some("a.b")).unwrap(), json!(1));
        assert_eq!(select(&tree, Some("  ")).unwrap(), json!({"a": {"b": 1}}));
        assert!(matches!(select(&tree, Some("a.c")), Err(ConfigError::Extract { .. })));
    }
}
