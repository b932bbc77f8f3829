//! Path canonicalization.
//!
//! Node paths are the graph's unique key, so two spellings of one file
//! ("out/./a.o", "out/x/../a.o") have to collapse to the same string before
//! they are looked up.

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar".
pub fn canon_path<T: Into<String>>(inpath: T) -> String {
    let path: String = inpath.into();
    if path.is_empty() {
        return path;
    }
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/') || path.ends_with("/.");

    let mut parts: Vec<&str> = Vec::new();
    // Leading ".." components that could not be popped.
    let mut ups = 0;
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() && !absolute {
                    ups += 1;
                }
            }
            _ => parts.push(comp),
        }
    }

    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    for _ in 0..ups {
        out.push_str("../");
    }
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(part);
    }
    if parts.is_empty() {
        if ups == 0 && !absolute {
            return ".".to_string();
        }
        // "../.." keeps its shape without the final slash.
        if ups > 0 && !trailing {
            out.pop();
        }
    } else if trailing {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop() {
        assert_eq!(canon_path("foo"), "foo");
        assert_eq!(canon_path("foo/bar"), "foo/bar");
    }

    #[test]
    fn dot() {
        assert_eq!(canon_path("./foo"), "foo");
        assert_eq!(canon_path("foo/."), "foo/");
        assert_eq!(canon_path("foo/./bar"), "foo/bar");
    }

    #[test]
    fn slash() {
        assert_eq!(canon_path("/foo"), "/foo");
        assert_eq!(canon_path("foo//bar"), "foo/bar");
    }

    #[test]
    fn parent() {
        assert_eq!(canon_path("foo/../bar"), "bar");
        assert_eq!(canon_path("/foo/../bar"), "/bar");
        assert_eq!(canon_path("../foo"), "../foo");
        assert_eq!(canon_path("../foo/../bar"), "../bar");
        assert_eq!(canon_path("../../bar"), "../../bar");
        assert_eq!(canon_path("../.."), "../..");
    }

    #[test]
    fn nothing_left() {
        assert_eq!(canon_path("."), ".");
        assert_eq!(canon_path("./"), ".");
        assert_eq!(canon_path("a/.."), ".");
        assert_eq!(canon_path("/a/.."), "/");
    }
}
