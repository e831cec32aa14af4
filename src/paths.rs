use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "TEXT_TRANSPLANT_DIR";
const BASE_DIR_NAME: &str = ".text-transplant";

pub(crate) fn settings_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(BASE_DIR_NAME)
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(suffix))
        }
    })
}

fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_tilde(trimmed))
}

/// Expands a leading `~` to `$HOME`; other paths are returned as given.
pub(crate) fn expand_tilde(value: &str) -> PathBuf {
    if (value == "~" || value.starts_with("~/"))
        && let Ok(home) = std::env::var("HOME")
    {
        let home = home.trim();
        if !home.is_empty() {
            return PathBuf::from(format!("{}{}", home, &value[1..]));
        }
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn settings_dir_lives_under_home() {
        with_temp_home(|home| {
            assert_eq!(settings_dir(), Some(home.join(".text-transplant")));
            assert_eq!(expand_tilde("~/fonts/a.ttf"), home.join("fonts/a.ttf"));
            assert_eq!(expand_tilde("fonts/~a.ttf"), PathBuf::from("fonts/~a.ttf"));
        });
    }
}
