//! Splitting user metadata into tags and key/value metadata.

use abq_protocol::Meta;
use serde_json::Value;

/// Keys the framework itself stores on tests and groups. Never reported.
pub const RESERVED_METADATA_KEYS: &[&str] = &[
    "absolute_file_path",
    "block",
    "described_class",
    "description",
    "description_args",
    "example_group",
    "execution_result",
    "file_path",
    "full_description",
    "last_run_status",
    "line_number",
    "location",
    "parent_example_group",
    "rerun_file_path",
    "scoped_id",
    "shared_group_inclusion_backtrace",
    "if",
    "unless",
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_METADATA_KEYS.contains(&key)
}

/// Returns `(tags, meta)`.
///
/// Reserved keys are dropped. A key whose value is exactly `true` is a tag;
/// every other key stays in the metadata with its value.
pub fn extract_metadata_and_tags(metadata: &Meta) -> (Vec<String>, Meta) {
    let mut tags = Vec::new();
    let mut meta = Meta::new();
    for (key, value) in metadata {
        if is_reserved(key) {
            continue;
        }
        match value {
            Value::Bool(true) => tags.push(key.clone()),
            _ => {
                meta.insert(key.clone(), value.clone());
            }
        }
    }
    (tags, meta)
}
