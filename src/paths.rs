use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "LLM_LAYOUT_RUST_DIR";

pub(crate) fn settings_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    default_base_dir()
}

/// Resolves a configured path: `~` expands to `$HOME`, relative paths stay
/// relative to the working directory.
pub(crate) fn expand_path(value: &str) -> PathBuf {
    normalize_path(PathBuf::from(expand_tilde(value.trim())))
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn default_base_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".llm-layout-rust"))
        }
    })
}

fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_path(trimmed))
}

fn normalize_path(path: PathBuf) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        normalized.push(component.as_os_str());
    }
    normalized
}

fn expand_tilde(value: &str) -> String {
    if value == "~" || value.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let home = home.trim();
            if home.is_empty() {
                return value.to_string();
            }
            if value == "~" {
                return home.to_string();
            }
            return format!("{}{}", home, &value[1..]);
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_keeps_relative_paths() {
        assert_eq!(
            expand_path("./static//uploads"),
            PathBuf::from("./static/uploads")
        );
        assert_eq!(expand_path("/srv/layout"), PathBuf::from("/srv/layout"));
    }
}
