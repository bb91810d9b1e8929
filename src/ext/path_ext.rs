use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Renders a path for messages, preferring its canonical form.
///
/// Staged trees are frequently deleted before the message is read, so when
/// canonicalisation fails the path is made absolute and lexically normalised
/// instead.
pub fn best_effort_path_display(path: &Path) -> String {
    match path.canonicalize() {
        Ok(canonical_path) => canonical_path.display().to_string(),
        Err(_) => {
            let absolute_path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|current_dir| current_dir.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            };

            normalize_path(&absolute_path).display().to_string()
        }
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else if components.is_empty() {
                    components.push(component);
                }
            }
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// Prepends `prefix` to a bare file name.
pub fn prefixed_name(prefix: &str, name: &std::ffi::OsStr) -> OsString {
    let mut prefixed = OsString::from(prefix);
    prefixed.push(name);
    prefixed
}

pub trait BestEffortPathExt {
    fn best_effort_path_display(&self) -> String;
}

impl<P: AsRef<Path> + ?Sized> BestEffortPathExt for P {
    fn best_effort_path_display(&self) -> String {
        best_effort_path_display(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("/a/b/../c", "/a/c")]
    #[case("/a/./b/", "/a/b")]
    #[case("/../a", "/a")]
    fn normalize_path_resolves_dot_components(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(Path::new(input)), PathBuf::from(expected));
    }

    #[test]
    fn display_of_missing_relative_path_is_absolute() {
        let shown = "does/not/exist/anywhere".best_effort_path_display();
        assert!(Path::new(&shown).is_absolute());
        assert!(shown.ends_with("does/not/exist/anywhere"));
    }

    #[test]
    fn prefixed_name_prepends() {
        assert_eq!(
            prefixed_name("mut_", std::ffi::OsStr::new("a.go")),
            OsString::from("mut_a.go")
        );
    }
}
