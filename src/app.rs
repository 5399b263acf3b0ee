use std::path::Path;
use std::sync::Arc;

use crate::archive::{NestedZipFactory, ZipSource};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::tree::filter::apply_filter;
use crate::tree::search::{self, SearchResult};
use crate::tree::sort::sort_tree;
use crate::tree::view::{self, FlatItem};
use crate::tree::{build_archive_root, expand_containers, ContainerFactory, Node, ProgressSink};

/// Open an archive and build its tree, ready for display.
///
/// Nested archives are expanded when enabled in `config`, and the tree is
/// sorted by the configured order. Blocking; run it off the async runtime.
pub fn load_archive(
    path: &Path,
    config: &AppConfig,
    progress: &dyn ProgressSink,
) -> Result<Arc<Node>> {
    let source = ZipSource::open(path)?;
    let root = build_archive_root(Arc::new(source), progress)?;

    if config.nested_enabled() {
        let factories: Vec<Box<dyn ContainerFactory>> =
            vec![Box::new(NestedZipFactory::new(config.nested_extensions()))];
        let expanded = expand_containers(&root, &factories, progress)?;
        log::info!("expanded {expanded} nested archives");
    }

    sort_tree(&root, config.sort_by(), config.dirs_first())?;
    Ok(root)
}

/// Main application state: the open archive and the config it was loaded with.
pub struct Explorer {
    pub config: AppConfig,
    root: Option<Arc<Node>>,
}

impl Explorer {
    pub fn new(config: AppConfig) -> Self {
        Self { config, root: None }
    }

    pub fn root(&self) -> Result<&Arc<Node>> {
        self.root
            .as_ref()
            .ok_or_else(|| AppError::NotFound("no archive is open".into()))
    }

    /// Make `root` the open archive, closing the previous one.
    pub fn replace_root(&mut self, root: Arc<Node>) {
        if let Some(previous) = self.root.replace(root) {
            previous.close();
        }
    }

    /// Close the open archive, if any.
    pub fn close(&mut self) {
        if let Some(root) = self.root.take() {
            root.close();
        }
    }

    /// Resolve a path relative to the archive root (either separator).
    pub fn lookup(&self, path: &str) -> Result<Arc<Node>> {
        self.root()?
            .find_path(path)
            .ok_or_else(|| AppError::NotFound(path.to_string()))
    }

    /// Apply `query` to the open tree; returns the number of visible leaves.
    pub fn set_filter(&self, query: &str) -> Result<usize> {
        Ok(apply_filter(self.root()?, query, self.config.ignore_symbols()))
    }

    /// Visible rows of the tree, optionally limited in depth.
    pub fn rows(&self, max_depth: Option<usize>) -> Result<Vec<FlatItem>> {
        Ok(view::flatten(self.root()?, max_depth))
    }

    pub fn find(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        Ok(search::find(self.root()?, query, limit))
    }
}

impl Drop for Explorer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::zip_bytes;
    use crate::config::{NestedConfig, TreeConfig};
    use crate::tree::NoProgress;
    use std::io::Read;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn write_zip(dir: &tempfile::TempDir, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, zip_bytes(files)).unwrap();
        path
    }

    fn sample(dir: &tempfile::TempDir) -> PathBuf {
        write_zip(
            dir,
            "game.p4k",
            &[
                ("Data/Ships/aegis.xml", b"<ship/>"),
                ("Data/Ships/drake.xml", b"<ship name='drake'/>"),
                ("Data/Weapons/laser.xml", b"<gun/>"),
                ("readme.txt", b"hello"),
            ],
        )
    }

    #[test]
    fn load_sorts_by_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            tree: TreeConfig {
                sort_by: Some("size".into()),
                dirs_first: Some(false),
            },
            ..Default::default()
        };
        let root = load_archive(&sample(&dir), &config, &NoProgress).unwrap();
        let ships = root.find_path("Data/Ships").unwrap();
        let titles: Vec<String> = ships
            .children()
            .snapshot()
            .iter()
            .map(|n| n.title().to_string())
            .collect();
        assert_eq!(titles, vec!["drake.xml", "aegis.xml"]);
    }

    #[test]
    fn load_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Mutex::new(Vec::new());
        let sink = |current: usize, max: usize, _status: &str| {
            seen.lock().unwrap().push((current, max));
        };
        load_archive(&sample(&dir), &AppConfig::default(), &sink).unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.last(), Some(&(4, 4)));
    }

    #[test]
    fn missing_archive_is_an_io_error() {
        let result = load_archive(
            Path::new("/nonexistent/game.p4k"),
            &AppConfig::default(),
            &NoProgress,
        );
        assert!(matches!(result, Err(AppError::Io(_))));
    }

    #[test]
    fn lookup_filter_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let mut explorer = Explorer::new(AppConfig::default());
        assert!(matches!(explorer.lookup("x"), Err(AppError::NotFound(_))));

        let root = load_archive(&sample(&dir), &explorer.config, &NoProgress).unwrap();
        explorer.replace_root(root);

        let node = explorer.lookup("Data\\Weapons/laser.xml").unwrap();
        let mut text = String::new();
        node.open_content().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "<gun/>");
        assert!(matches!(explorer.lookup("Data/nope"), Err(AppError::NotFound(_))));

        assert_eq!(explorer.set_filter("ships").unwrap(), 2);
        let names: Vec<String> = explorer
            .rows(None)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["game.p4k", "Data", "Ships", "aegis.xml", "drake.xml"]);

        let hits = explorer.find("laser", 5).unwrap();
        assert_eq!(hits[0].relative_path, "Data\\Weapons\\laser.xml");
    }

    #[test]
    fn replacing_the_root_closes_the_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut explorer = Explorer::new(AppConfig::default());
        let first = load_archive(&sample(&dir), &explorer.config, &NoProgress).unwrap();
        let old_leaf = first.find_path("readme.txt").unwrap();
        explorer.replace_root(first);

        let other = write_zip(&dir, "other.p4k", &[("x.txt", b"x")]);
        let second = load_archive(&other, &explorer.config, &NoProgress).unwrap();
        explorer.replace_root(second);

        assert!(matches!(
            old_leaf.open_content(),
            Err(AppError::ContentUnavailable { .. })
        ));
        assert!(explorer.lookup("x.txt").unwrap().open_content().is_ok());
    }

    #[test]
    fn nested_archives_expand_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let inner = zip_bytes(&[("inner.txt", b"deep")]);
        let path = write_zip(&dir, "outer.p4k", &[("Data/objects.pak", &inner)]);
        let config = AppConfig {
            nested: NestedConfig {
                enabled: Some(true),
                extensions: None,
            },
            ..Default::default()
        };
        let root = load_archive(&path, &config, &NoProgress).unwrap();
        assert!(root.find_path("Data/objects.pak").unwrap().is_container());
        assert!(root.find_path("Data/objects.pak/inner.txt").is_some());
    }
}
