//! Tree dumps for debugging selectors.

use super::ProxyObject;
use crate::result::ProbeResult;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

impl ProxyObject {
    /// Write this object's properties and those of its descendants to `out`.
    ///
    /// Each object prints as a `== path ==` header followed by sorted
    /// `key: value` lines, indented two spaces per level. With `maxdepth`,
    /// only objects at most that many levels below this one are printed.
    /// An object destroyed during the dump is reported inline as an
    /// `Error:` line instead of aborting.
    ///
    /// This walks the whole subtree and is slow; use it to find selectors,
    /// not in tests.
    ///
    /// # Errors
    ///
    /// Returns I/O errors, and query errors other than not-found
    pub fn print_tree<W: Write>(&self, out: &mut W, maxdepth: Option<usize>) -> ProbeResult<()> {
        self.write_tree(out, maxdepth, 0)
    }

    /// [`ProxyObject::print_tree`] into a file, replacing its contents
    ///
    /// # Errors
    ///
    /// See [`ProxyObject::print_tree`]
    pub fn print_tree_to_path(&self, path: impl AsRef<Path>, maxdepth: Option<usize>) -> ProbeResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_tree(&mut out, maxdepth, 0)?;
        out.flush()?;
        Ok(())
    }

    /// [`ProxyObject::print_tree`] to standard output
    ///
    /// # Errors
    ///
    /// See [`ProxyObject::print_tree`]
    pub fn print_tree_stdout(&self, maxdepth: Option<usize>) -> ProbeResult<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.write_tree(&mut out, maxdepth, 0)
    }

    fn write_tree(&self, out: &mut dyn Write, maxdepth: Option<usize>, depth: usize) -> ProbeResult<()> {
        if maxdepth.is_some_and(|max| depth > max) {
            return Ok(());
        }
        let indent = "  ".repeat(depth);
        if depth > 0 {
            writeln!(out)?;
        }
        writeln!(out, "{indent}== {} ==", self.get_path())?;

        // Children were fetched by the level above, so their cache is current.
        let properties = if depth > 0 {
            self.cached_properties()
        } else {
            self.get_properties()?
        };

        match self.write_body(out, &properties, &indent, maxdepth, depth) {
            Err(err) if err.is_not_found() => {
                writeln!(out, "{indent}Error: {err}")?;
                Ok(())
            }
            other => other,
        }
    }

    fn write_body(
        &self,
        out: &mut dyn Write,
        properties: &super::Properties,
        indent: &str,
        maxdepth: Option<usize>,
        depth: usize,
    ) -> ProbeResult<()> {
        for (key, value) in properties {
            writeln!(out, "{indent}{key}: {value}")?;
        }
        if maxdepth.map_or(true, |max| depth < max) {
            for child in self.get_children()? {
                child.write_tree(out, maxdepth, depth + 1)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::super::tests::root_of;
    use super::*;
    use crate::backend::Row;
    use crate::fake::FakeAddress;
    use serde_json::json;
    use std::sync::Arc;

    fn small_tree() -> Arc<FakeAddress> {
        Arc::new(FakeAddress::tree(vec![
            Row::new("/App", json!({"id": [0, 1], "title": [0, "Main"]})),
            Row::new("/App/Label", json!({"id": [0, 2], "text": [0, "hi"], "enabled": [0, true]})),
            Row::new("/App/Label/Icon", json!({"id": [0, 3], "size": [3, 16, 16]})),
        ]))
    }

    fn dump(root: &ProxyObject, maxdepth: Option<usize>) -> String {
        let mut out = Vec::new();
        root.print_tree(&mut out, maxdepth).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_full_dump() {
        let root = root_of(&small_tree());
        let expected = "\
== /App ==
id: 1
title: 'Main'

  == /App/Label ==
  enabled: True
  id: 2
  text: 'hi'

    == /App/Label/Icon ==
    id: 3
    size: Size(16, 16)
";
        assert_eq!(dump(&root, None), expected);
    }

    #[test]
    fn test_maxdepth_limits_levels() {
        let root = root_of(&small_tree());
        let text = dump(&root, Some(1));
        assert!(text.contains("== /App/Label =="));
        assert!(!text.contains("Icon"));
        assert_eq!(dump(&root, Some(0)), "== /App ==\nid: 1\ntitle: 'Main'\n");
    }

    #[test]
    fn test_destroyed_object_dump() {
        let address = small_tree();
        let root = root_of(&address);
        let label = root.get_children().unwrap().remove(0);
        address.remove_subtree("/App/Label");

        let mut out = Vec::new();
        label.write_tree(&mut out, None, 1).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "\n  == /App/Label ==\n  enabled: True\n  id: 2\n  text: 'hi'\n");

        let mut out = Vec::new();
        let err = label.print_tree(&mut out, None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_print_to_path() {
        let root = root_of(&small_tree());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.txt");
        root.print_tree_to_path(&path, Some(0)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("== /App ==\n"));
    }
}
