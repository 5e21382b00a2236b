//! ICY (Shoutcast/Icecast) in-band metadata removal.
//!
//! When a server answers `Icy-MetaData: 1` with an `icy-metaint` header, every
//! `metaint` audio bytes are followed by one length byte (in 16-byte units)
//! and that many bytes of `Key='value';` metadata. The demuxer strips those
//! blocks so the decoder only sees audio.

use std::io::{self, Read};

type TitleCallback = Box<dyn FnMut(&str) + Send>;

/// `Read` adapter that removes ICY metadata blocks from an audio body.
pub struct IcyDemuxer<R> {
    inner: R,
    metaint: usize,
    until_meta: usize,
    last_title: Option<String>,
    on_title: Option<TitleCallback>,
}

impl<R: Read> IcyDemuxer<R> {
    pub fn new(inner: R, metaint: usize) -> Self {
        Self {
            inner,
            metaint,
            until_meta: metaint,
            last_title: None,
            on_title: None,
        }
    }

    /// Call `f` whenever a new `StreamTitle` arrives.
    pub fn on_title(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_title = Some(Box::new(f));
        self
    }

    pub fn last_title(&self) -> Option<&str> {
        self.last_title.as_deref()
    }

    fn consume_metadata(&mut self) -> io::Result<()> {
        let mut len_byte = [0u8; 1];
        self.inner.read_exact(&mut len_byte)?;
        let len = len_byte[0] as usize * 16;
        if len == 0 {
            return Ok(());
        }
        let mut block = vec![0u8; len];
        self.inner.read_exact(&mut block)?;

        let text = String::from_utf8_lossy(&block);
        if let Some(title) = extract_stream_title(&text) {
            if self.last_title.as_deref() != Some(title) {
                tracing::info!(title = %title, "stream title");
                if let Some(cb) = self.on_title.as_mut() {
                    cb(title);
                }
                self.last_title = Some(title.to_string());
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for IcyDemuxer<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.metaint == 0 {
            return self.inner.read(buf);
        }
        if self.until_meta == 0 {
            match self.consume_metadata() {
                Ok(()) => {}
                // Body ended inside or right before a metadata block.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(e),
            }
            self.until_meta = self.metaint;
        }
        let want = buf.len().min(self.until_meta);
        let n = self.inner.read(&mut buf[..want])?;
        self.until_meta -= n;
        Ok(n)
    }
}

/// Value of `StreamTitle='...'` in a metadata block, if present and non-empty.
pub fn extract_stream_title(meta: &str) -> Option<&str> {
    const KEY: &str = "StreamTitle='";
    let start = meta.find(KEY)? + KEY.len();
    let rest = &meta[start..];
    let end = rest.find("';").or_else(|| rest.rfind('\''))?;
    let title = rest[..end].trim();
    (!title.is_empty()).then_some(title)
}
