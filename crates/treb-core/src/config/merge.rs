//! Configuration layer merging: global, then project.

/// Merge `layer` into `base` key by key. Tables merge recursively, any other
/// value in `layer` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
        } else {
            base.insert(key, toml::Value::Table(incoming));
        }
    }
}
