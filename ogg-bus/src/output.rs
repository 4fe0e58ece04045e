use std::{
    fs::File,
    io::Write,
    path::PathBuf,
};

use anyhow::Context;

use crate::page::Page;

/// Where chunk files go: `{dir}/{prefix}{index}.{extension}`, index 0 being
/// the header file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkNaming {
    pub dir: PathBuf,
    pub prefix: String,
    pub extension: String,
}

impl Default for ChunkNaming {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "output".to_string(),
            extension: "ogv".to_string(),
        }
    }
}

impl ChunkNaming {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.prefix, index, self.extension))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    pub header: PathBuf,
    pub bodies: Vec<PathBuf>,
    pub video_packets: u64,
    pub audio_pages: u64,
    pub bytes_written: u64,
}

struct ChunkFile {
    path: PathBuf,
    file: File,
}

impl ChunkFile {
    fn create(path: PathBuf) -> anyhow::Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        log::debug!("opened {}", path.display());
        Ok(Self { path, file })
    }

    fn write_page(&mut self, page: &Page) -> anyhow::Result<()> {
        self.file
            .write_all(page.as_bytes())
            .and_then(|_| self.file.flush())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// Owns the header file and the rotating body files.
///
/// Header pages are held until [`ChunkOutput::seal_header`], which writes the
/// BOS pages of every stream ahead of the remaining header pages. Body files
/// are opened on the first page they receive, and a rotation requested by
/// [`ChunkOutput::video_packet_emitted`] takes effect on the next video page,
/// so no body ever ends up empty.
pub struct ChunkOutput {
    naming: ChunkNaming,
    header: Option<ChunkFile>,
    header_path: PathBuf,
    bos_pages: Vec<Page>,
    header_pages: Vec<Page>,
    sealed: bool,
    body: Option<ChunkFile>,
    bodies: Vec<PathBuf>,
    next_index: u32,
    packets_per_chunk: u32,
    packets_in_chunk: u32,
    rotate_pending: bool,
    video_packets: u64,
    audio_pages: u64,
    bytes_written: u64,
}

impl ChunkOutput {
    pub fn create(naming: ChunkNaming) -> anyhow::Result<Self> {
        if !naming.dir.as_os_str().is_empty() && !naming.dir.exists() {
            std::fs::create_dir_all(&naming.dir)
                .with_context(|| format!("failed to create {}", naming.dir.display()))?;
        }
        let header_path = naming.path(0);
        let header = ChunkFile::create(header_path.clone())?;
        Ok(Self {
            naming,
            header: Some(header),
            header_path,
            bos_pages: Vec::new(),
            header_pages: Vec::new(),
            sealed: false,
            body: None,
            bodies: Vec::new(),
            next_index: 1,
            packets_per_chunk: u32::MAX,
            packets_in_chunk: 0,
            rotate_pending: false,
            video_packets: 0,
            audio_pages: 0,
            bytes_written: 0,
        })
    }

    pub fn set_packets_per_chunk(&mut self, packets: u32) {
        self.packets_per_chunk = packets.max(1);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn write_header_page(&mut self, page: Page) -> anyhow::Result<()> {
        if self.sealed {
            anyhow::bail!(
                "header page of stream {} arrived after the header file was sealed",
                page.serial()
            );
        }
        if page.is_bos() {
            self.bos_pages.push(page);
        } else {
            self.header_pages.push(page);
        }
        Ok(())
    }

    /// Writes the buffered header pages and closes the header file.
    pub fn seal_header(&mut self) -> anyhow::Result<()> {
        if self.sealed {
            return Ok(());
        }
        let Some(mut header) = self.header.take() else {
            anyhow::bail!("header file already closed");
        };
        for page in self.bos_pages.drain(..).chain(self.header_pages.drain(..)) {
            header.write_page(&page)?;
            self.bytes_written += page.len() as u64;
        }
        self.sealed = true;
        log::info!("wrote header {}", header.path.display());
        Ok(())
    }

    pub fn write_audio_page(&mut self, page: &Page) -> anyhow::Result<()> {
        self.write_body_page(page)?;
        self.audio_pages += 1;
        Ok(())
    }

    pub fn write_video_page(&mut self, page: &Page) -> anyhow::Result<()> {
        if self.rotate_pending {
            self.rotate();
        }
        self.write_body_page(page)
    }

    /// Counts an encoded video packet whose pages were all written.
    pub fn video_packet_emitted(&mut self) {
        self.video_packets += 1;
        self.packets_in_chunk += 1;
        if self.packets_in_chunk >= self.packets_per_chunk {
            self.rotate_pending = true;
        }
    }

    fn rotate(&mut self) {
        if let Some(body) = self.body.take() {
            log::info!(
                "closed {} after {} video packets",
                body.path.display(),
                self.packets_in_chunk
            );
        }
        self.packets_in_chunk = 0;
        self.rotate_pending = false;
    }

    fn write_body_page(&mut self, page: &Page) -> anyhow::Result<()> {
        if !self.sealed {
            self.seal_header()?;
        }
        if self.body.is_none() {
            let path = self.naming.path(self.next_index);
            self.next_index += 1;
            self.bodies.push(path.clone());
            self.body = Some(ChunkFile::create(path)?);
        }
        let Some(body) = self.body.as_mut() else {
            anyhow::bail!("no body file open");
        };
        body.write_page(page)?;
        self.bytes_written += page.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> anyhow::Result<ChunkSummary> {
        self.seal_header()?;
        if let Some(body) = self.body.take() {
            log::info!(
                "closed {} after {} video packets",
                body.path.display(),
                self.packets_in_chunk
            );
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            header: self.header_path.clone(),
            bodies: self.bodies.clone(),
            video_packets: self.video_packets,
            audio_pages: self.audio_pages,
            bytes_written: self.bytes_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{FLAG_BOS, Page};

    fn page(flags: u8, serial: u32, sequence: u32, body: &[u8]) -> Page {
        Page::build(flags, 0, serial, sequence, &[body.len() as u8], body)
    }

    #[test]
    fn test_naming() {
        let naming = ChunkNaming::default();
        assert_eq!(naming.path(0), PathBuf::from("./output0.ogv"));
        assert_eq!(
            ChunkNaming::new("/tmp/x", "seg").path(12),
            PathBuf::from("/tmp/x/seg12.ogv")
        );
    }

    #[test]
    fn test_header_pages_bos_first() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut output = ChunkOutput::create(ChunkNaming::new(dir.path(), "output"))?;
        let video_bos = page(FLAG_BOS, 1, 0, b"v0");
        let video_rest = page(0, 1, 1, b"v1");
        let audio_bos = page(FLAG_BOS, 2, 0, b"a0");
        output.write_header_page(video_bos.clone())?;
        output.write_header_page(video_rest.clone())?;
        output.write_header_page(audio_bos.clone())?;
        output.seal_header()?;
        assert!(output.write_header_page(page(0, 2, 1, b"a1")).is_err());

        let summary = output.finish()?;
        assert!(summary.bodies.is_empty());
        let written = std::fs::read(&summary.header)?;
        let expected: Vec<u8> = [&video_bos, &audio_bos, &video_rest]
            .iter()
            .flat_map(|p| p.as_bytes().to_vec())
            .collect();
        assert_eq!(written, expected);
        Ok(())
    }

    #[test]
    fn test_rotation_waits_for_next_video_page() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut output = ChunkOutput::create(ChunkNaming::new(dir.path(), "c"))?;
        output.set_packets_per_chunk(2);
        output.seal_header()?;

        for sequence in 0..4 {
            output.write_video_page(&page(0, 1, sequence, b"v"))?;
            output.video_packet_emitted();
        }
        // Audio after the threshold stays in the current body.
        output.write_audio_page(&page(0, 2, 0, b"a"))?;
        output.write_video_page(&page(0, 1, 4, b"v"))?;
        output.video_packet_emitted();

        let summary = output.finish()?;
        assert_eq!(summary.bodies.len(), 3);
        assert_eq!(summary.video_packets, 5);
        assert_eq!(summary.audio_pages, 1);
        let first = std::fs::read(&summary.bodies[0])?;
        let second = std::fs::read(&summary.bodies[1])?;
        let third = std::fs::read(&summary.bodies[2])?;
        assert_eq!(first.len(), 2 * page(0, 1, 0, b"v").len());
        assert_eq!(second.len(), 3 * page(0, 1, 0, b"v").len());
        assert_eq!(third.len(), page(0, 1, 0, b"v").len());
        Ok(())
    }
}
