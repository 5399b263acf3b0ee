use std::io::{self, Cursor, Read, Seek};
use std::sync::Arc;

/// A readable, seekable content handle.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// What a content accessor hands back.
///
/// Archive codecs often only produce forward-only decoders; those are
/// reported as `Stream` and buffered before reaching the caller.
pub enum ContentHandle {
    Seekable(Box<dyn ReadSeek>),
    Stream(Box<dyn Read + Send>),
}

impl ContentHandle {
    pub fn seekable<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        ContentHandle::Seekable(Box::new(reader))
    }

    #[allow(dead_code)]
    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        ContentHandle::Stream(Box::new(reader))
    }

    /// Return a seekable handle, copying a forward-only stream into memory.
    ///
    /// The original stream is dropped once its bytes have been copied.
    pub fn into_seekable(self) -> io::Result<Box<dyn ReadSeek>> {
        match self {
            ContentHandle::Seekable(reader) => Ok(reader),
            ContentHandle::Stream(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer)?;
                drop(reader);
                Ok(Box::new(Cursor::new(buffer)))
            }
        }
    }
}

/// Zero-argument function producing a fresh content handle.
///
/// Each leaf owns its own accessor bound to one specific entry.
pub type ContentAccessor = Arc<dyn Fn() -> io::Result<ContentHandle> + Send + Sync>;

/// Wrap a closure as a [`ContentAccessor`].
pub fn accessor<F>(f: F) -> ContentAccessor
where
    F: Fn() -> io::Result<ContentHandle> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Accessor over an owned in-memory buffer.
#[allow(dead_code)]
pub fn bytes_accessor(bytes: impl Into<Arc<[u8]>>) -> ContentAccessor {
    let bytes: Arc<[u8]> = bytes.into();
    accessor(move || Ok(ContentHandle::seekable(Cursor::new(bytes.to_vec()))))
}
