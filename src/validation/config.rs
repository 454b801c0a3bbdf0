use serde_json::Value;

use crate::config::ExtraConfig;

/// Key under which endpoints and backends carry their JSON Schema.
pub const NAMESPACE: &str = "github.com/devopsfaith/krakend-jsonschema";

/// The schema definition configured in `extra_config`, if any.
///
/// The value is returned as-is; its shape is checked when it is compiled.
pub fn extract(extra_config: &ExtraConfig) -> Option<&Value> {
    extra_config.get(NAMESPACE)
}
