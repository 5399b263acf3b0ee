//! Building archive namespaces from entry enumerators.
//!
//! A root (or nested container) is `Loading` while its entries are inserted
//! and `Ready` once enumeration completes. Any enumeration error aborts the
//! build: the partially built subtree is dropped and the caller receives a
//! [`AppError::ConstructionFailure`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::tree::content::ContentAccessor;
use crate::tree::node::{LeafContent, Node, NodeKind};

/// Report progress every this many entries.
pub const PROGRESS_STRIDE: usize = 256;

/// One file entry of an opened archive.
pub struct ArchiveEntry {
    pub full_path: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Bound to this entry alone.
    pub accessor: ContentAccessor,
}

/// An opened archive that can enumerate its file entries.
pub trait ArchiveSource: Send + Sync {
    /// Display name, used as the root title.
    fn name(&self) -> &str;

    /// Number of entries `entries` will yield, for progress reporting.
    fn entry_count(&self) -> usize;

    fn entries(&self) -> Box<dyn Iterator<Item = Result<ArchiveEntry>> + '_>;

    /// Release the underlying handle; accessors fail afterwards.
    fn close(&self);
}

/// One named sub-stream of a nested container.
pub struct SubStream {
    /// Path inside the container; may contain separators.
    pub name: String,
    pub size: u64,
    pub accessor: ContentAccessor,
}

/// Content of a leaf that is itself an enumerable set of sub-streams.
pub trait SubStreamSource {
    fn stream_count(&self) -> usize;

    fn streams(&self) -> Box<dyn Iterator<Item = Result<SubStream>> + '_>;
}

/// Recognises leaves that should be expanded into nested containers.
pub trait ContainerFactory: Send + Sync {
    fn matches(&self, leaf: &Node) -> bool;

    fn open(&self, leaf: &Node) -> Result<Box<dyn SubStreamSource>>;
}

/// Receives `(current, max, status)` during long-running construction.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: usize, max: usize, status: &str);
}

/// Discards all progress.
#[allow(dead_code)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _current: usize, _max: usize, _status: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, current: usize, max: usize, status: &str) {
        self(current, max, status)
    }
}

fn should_report(index: usize, max: usize) -> bool {
    index % PROGRESS_STRIDE == 0 || index == max
}

/// Enumerate `source` into a new `Ready` root that keeps the archive open.
pub fn build_archive_root(
    source: Arc<dyn ArchiveSource>,
    progress: &dyn ProgressSink,
) -> Result<Arc<Node>> {
    let started = Instant::now();
    let name = source.name().to_string();
    let max = source.entry_count();
    let root = Node::new_root(name.clone(), Some(source.clone()));

    let mut loaded = 0;
    for entry in source.entries() {
        let entry = entry.map_err(|e| AppError::construction(&name, e))?;
        root.add_stream(
            &entry.full_path,
            entry.accessor,
            entry.last_modified,
            entry.size,
        )
        .map_err(|e| AppError::construction(&name, e))?;

        loaded += 1;
        if should_report(loaded, max) {
            progress.report(
                loaded,
                max,
                &format!("Loading file {loaded}/{max} from archive"),
            );
        }
    }

    root.mark_ready();
    let elapsed = started.elapsed().as_millis();
    log::info!("loaded {loaded} entries from {name} in {elapsed}ms");
    progress.report(loaded, max, &format!("Loaded {name} in {elapsed}ms"));
    Ok(root)
}

/// Build a `Ready` container mirroring `leaf`, populated from `source`.
///
/// Sub-streams inherit the leaf's timestamp.
pub fn build_container(
    leaf: &Node,
    source: &dyn SubStreamSource,
    progress: &dyn ProgressSink,
) -> Result<Arc<Node>> {
    let content = match leaf.kind() {
        NodeKind::Leaf(content) => content,
        _ => {
            return Err(AppError::construction(
                leaf.title(),
                "only plain leaves can be expanded",
            ))
        }
    };
    let title = leaf.title().to_string();
    let last_modified = leaf.last_modified().unwrap_or_default();
    let container = Node::new_container(
        title.clone(),
        LeafContent::new(content.accessor().clone(), last_modified, leaf.byte_length()),
    );

    let max = source.stream_count();
    let mut loaded = 0;
    for stream in source.streams() {
        let stream = stream.map_err(|e| AppError::construction(&title, e))?;
        container
            .add_stream(&stream.name, stream.accessor, last_modified, stream.size)
            .map_err(|e| AppError::construction(&title, e))?;

        loaded += 1;
        if should_report(loaded, max) {
            progress.report(
                loaded,
                max,
                &format!("Expanding {loaded}/{max} from {title}"),
            );
        }
    }

    container.mark_ready();
    log::debug!("expanded {title} into {loaded} streams");
    Ok(container)
}

/// Replace every plain leaf below `root` that a factory recognises with an
/// expanded container, in place. Returns the number of containers created.
///
/// Works from a snapshot of the current descendants, so containers created
/// here are not themselves re-examined.
pub fn expand_containers(
    root: &Arc<Node>,
    factories: &[Box<dyn ContainerFactory>],
    progress: &dyn ProgressSink,
) -> Result<usize> {
    if factories.is_empty() {
        return Ok(0);
    }
    let candidates: Vec<Arc<Node>> = root.all_descendants().to_vec();
    let mut expanded = 0;

    for leaf in candidates {
        if !matches!(leaf.kind(), NodeKind::Leaf(_)) {
            continue;
        }
        let Some(factory) = factories.iter().find(|f| f.matches(&leaf)) else {
            continue;
        };
        let Some(parent) = leaf.parent() else {
            continue;
        };
        let Some(index) = parent.children().index_of(&leaf) else {
            continue;
        };

        let source = factory
            .open(&leaf)
            .map_err(|e| AppError::construction(leaf.title(), e))?;
        let container = build_container(&leaf, source.as_ref(), progress)?;
        parent.children().set(index, container)?;
        expanded += 1;
    }

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::content::bytes_accessor;
    use chrono::TimeZone;
    use std::io::Read;
    use std::sync::Mutex;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 8, 30, 0).unwrap()
    }

    /// In-memory archive: `(path, bytes)` pairs, optionally failing at an index.
    struct MemArchive {
        files: Vec<(&'static str, &'static str)>,
        fail_at: Option<usize>,
        closed: Arc<Mutex<bool>>,
    }

    impl MemArchive {
        fn new(files: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                files,
                fail_at: None,
                closed: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl ArchiveSource for MemArchive {
        fn name(&self) -> &str {
            "mem.p4k"
        }

        fn entry_count(&self) -> usize {
            self.files.len()
        }

        fn entries(&self) -> Box<dyn Iterator<Item = Result<ArchiveEntry>> + '_> {
            Box::new(self.files.iter().enumerate().map(move |(i, (path, bytes))| {
                if Some(i) == self.fail_at {
                    return Err(AppError::Io(std::io::Error::other("corrupt entry")));
                }
                Ok(ArchiveEntry {
                    full_path: path.to_string(),
                    last_modified: stamp(),
                    size: bytes.len() as u64,
                    accessor: bytes_accessor(bytes.as_bytes().to_vec()),
                })
            }))
        }

        fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    /// Splits a leaf's content into one sub-stream per line.
    struct LineFactory;

    struct Lines(Vec<String>);

    impl SubStreamSource for Lines {
        fn stream_count(&self) -> usize {
            self.0.len()
        }

        fn streams(&self) -> Box<dyn Iterator<Item = Result<SubStream>> + '_> {
            Box::new(self.0.iter().enumerate().map(|(i, line)| {
                Ok(SubStream {
                    name: format!("records/{i}.txt"),
                    size: line.len() as u64,
                    accessor: bytes_accessor(line.clone().into_bytes()),
                })
            }))
        }
    }

    impl ContainerFactory for LineFactory {
        fn matches(&self, leaf: &Node) -> bool {
            leaf.title().ends_with(".lines")
        }

        fn open(&self, leaf: &Node) -> Result<Box<dyn SubStreamSource>> {
            let mut text = String::new();
            leaf.open_content()?.read_to_string(&mut text)?;
            Ok(Box::new(Lines(text.lines().map(String::from).collect())))
        }
    }

    #[test]
    fn builds_ready_root_from_entries() {
        let source = Arc::new(MemArchive::new(vec![
            ("a/b/c.txt", "ccc"),
            ("a/b/d.txt", "dddd"),
        ]));
        let root = build_archive_root(source, &NoProgress).unwrap();

        assert_eq!(root.title(), "mem.p4k");
        assert_eq!(root.load_state(), crate::tree::node::LoadState::Ready);
        let b = root.find_path("a/b").unwrap();
        assert_eq!(b.relative_path(), "a\\b");
        assert_eq!(b.children().len(), 2);
        assert_eq!(root.byte_length(), 7);
        assert_eq!(root.last_modified(), Some(stamp()));
    }

    #[test]
    fn each_leaf_reads_its_own_entry() {
        let source = Arc::new(MemArchive::new(vec![("x.txt", "first"), ("y.txt", "second")]));
        let root = build_archive_root(source, &NoProgress).unwrap();

        for (path, expected) in [("x.txt", "first"), ("y.txt", "second")] {
            let mut out = String::new();
            root.find_path(path)
                .unwrap()
                .open_content()
                .unwrap()
                .read_to_string(&mut out)
                .unwrap();
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn enumeration_failure_is_construction_failure() {
        let mut source = MemArchive::new(vec![("ok.txt", "1"), ("bad.txt", "2")]);
        source.fail_at = Some(1);
        let err = build_archive_root(Arc::new(source), &NoProgress).unwrap_err();
        match err {
            AppError::ConstructionFailure { name, reason } => {
                assert_eq!(name, "mem.p4k");
                assert!(reason.contains("corrupt entry"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn progress_reaches_the_end() {
        let files: Vec<(&'static str, &'static str)> = vec![("a", "1"), ("b", "2"), ("c", "3")];
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let progress = move |current: usize, max: usize, _status: &str| {
            sink.lock().unwrap().push((current, max));
        };

        build_archive_root(Arc::new(MemArchive::new(files)), &progress).unwrap();

        let reports = reports.lock().unwrap();
        assert!(reports.contains(&(3, 3)));
        assert!(reports.iter().all(|(_, max)| *max == 3));
    }

    #[test]
    fn closing_root_releases_archive() {
        let source = MemArchive::new(vec![("a.txt", "a")]);
        let closed = source.closed.clone();
        let root = build_archive_root(Arc::new(source), &NoProgress).unwrap();
        assert_eq!(root.archive_name().as_deref(), Some("mem.p4k"));

        root.close();
        assert!(*closed.lock().unwrap());
        assert!(root.archive_name().is_none());
    }

    #[test]
    fn expands_matching_leaves_in_place() {
        let source = Arc::new(MemArchive::new(vec![
            ("game/defs.lines", "alpha\nbeta"),
            ("game/readme.txt", "hi"),
        ]));
        let root = build_archive_root(source, &NoProgress).unwrap();
        let replaced = Arc::new(Mutex::new(0));
        let counter = replaced.clone();
        let game = root.find_path("game").unwrap();
        game.children().subscribe(move |change| {
            if let crate::tree::collection::CollectionChange::Replace { .. } = change {
                *counter.lock().unwrap() += 1;
            }
        });

        let factories: Vec<Box<dyn ContainerFactory>> = vec![Box::new(LineFactory)];
        let count = expand_containers(&root, &factories, &NoProgress).unwrap();

        assert_eq!(count, 1);
        assert_eq!(*replaced.lock().unwrap(), 1);
        let container = root.find_path("game/defs.lines").unwrap();
        assert!(container.is_container());
        assert_eq!(game.children().index_of(&container), Some(0));

        let record = root.find_path("game/defs.lines/records/1.txt").unwrap();
        assert_eq!(record.relative_path(), "game\\defs.lines\\records\\1.txt");
        assert_eq!(record.last_modified(), Some(stamp()));
        let mut out = String::new();
        record.open_content().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "beta");

        // The container still exposes the original bytes.
        let mut raw = String::new();
        container.open_content().unwrap().read_to_string(&mut raw).unwrap();
        assert_eq!(raw, "alpha\nbeta");
    }

    #[test]
    fn expansion_failure_propagates() {
        struct Broken;
        impl ContainerFactory for Broken {
            fn matches(&self, _leaf: &Node) -> bool {
                true
            }
            fn open(&self, _leaf: &Node) -> Result<Box<dyn SubStreamSource>> {
                Err(AppError::InvalidPath("unparseable".into()))
            }
        }

        let root = build_archive_root(
            Arc::new(MemArchive::new(vec![("a.bin", "0")])),
            &NoProgress,
        )
        .unwrap();
        let factories: Vec<Box<dyn ContainerFactory>> = vec![Box::new(Broken)];
        let err = expand_containers(&root, &factories, &NoProgress).unwrap_err();
        assert!(matches!(err, AppError::ConstructionFailure { .. }));
        assert!(root.find_path("a.bin").unwrap().has_content());
    }
}
