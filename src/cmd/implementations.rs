//! `reloadable-config implementations`: list what a bootstrap file can name.

use crate::bootstrap::Registries;
use crate::creator::InstanceCreatorRegistry;

pub fn execute() {
    let registries = Registries::builtin();
    print_registry(&registries.sources);
    println!();
    print_registry(&registries.transformers);
}

fn print_registry<T: 'static>(registry: &InstanceCreatorRegistry<T>) {
    println!("{}s:", registry.kind());
    for line in describe(registry) {
        println!("  {line}");
    }
}

/// One `name (aliases: ...) [order N]` line per registered entry.
pub(crate) fn describe<T: 'static>(registry: &InstanceCreatorRegistry<T>) -> Vec<String> {
    registry
        .names()
        .into_iter()
        .map(|(name, aliases, order)| {
            let mut line = name.to_string();
            if !aliases.is_empty() {
                line.push_str(&format!(" (aliases: {})", aliases.join(", ")));
            }
            if order != 0 {
                line.push_str(&format!(" [order {order}]"));
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnvironment;
    use std::sync::Arc;

    #[test]
    fn lists_builtin_sources_with_aliases() {
        let registries = Registries::with_environment(Arc::new(MapEnvironment::new()));
        let lines = describe(&registries.sources);
        assert!(lines.contains(&"file (aliases: filesystem, fs)".to_string()));
        assert!(lines.contains(&"inline (aliases: static)".to_string()));
        assert_eq!(describe(&registries.transformers).len(), 2);
    }
}
