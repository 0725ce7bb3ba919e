//! Deriving a display name from a model checkpoint path.

/// Returns a short model name for `model_path`.
///
/// The last path component is used, except for training checkpoints
/// (`.../run-name/checkpoint-1200`) where the parent is joined in front
/// (`run-name_checkpoint-1200`) so different runs stay distinguishable.
pub fn get_model_name_from_path(model_path: &str) -> String {
    let parts: Vec<&str> = model_path.trim_matches('/').split('/').collect();
    let last = parts.last().copied().unwrap_or_default();
    match parts.len().checked_sub(2).map(|i| parts[i]) {
        Some(parent) if last.starts_with("checkpoint-") => format!("{parent}_{last}"),
        _ => last.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paths() {
        assert_eq!(get_model_name_from_path("agi-collective/robin-llama"), "robin-llama");
        assert_eq!(get_model_name_from_path("/models/robin-mistral-7b/"), "robin-mistral-7b");
        assert_eq!(get_model_name_from_path("robin"), "robin");
    }

    #[test]
    fn test_checkpoint_paths_include_parent() {
        assert_eq!(
            get_model_name_from_path("/runs/robin-v2/checkpoint-1200/"),
            "robin-v2_checkpoint-1200"
        );
        assert_eq!(get_model_name_from_path("checkpoint-5"), "checkpoint-5");
    }
}
