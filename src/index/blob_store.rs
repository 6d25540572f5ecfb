//! Cluster-addressed blob file with chained growth.
//!
//! The file is an array of fixed-size clusters. The first 256 bytes hold the
//! store header; the cluster right after them (handle `256 / cluster_size`)
//! is reserved for the index signature. Every other cluster starts with a
//! small header:
//!
//! ```text
//! flags:u8 (bit 0 = chain head), used:u8, next:i32 (0 = end of chain)
//! ```
//!
//! A chain is addressed by the handle of its head cluster. Appending fills
//! the free space of the tail cluster, then links freshly allocated clusters
//! behind it, so the tail handle moves while the head stays put.

use crate::error::{IndexError, Result};
use crate::index::types::Handle;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"TDXBLOB1";

/// Bytes reserved for the store header at the start of the file
pub const HEADER_REGION: u32 = 256;

const CLUSTER_HEADER: usize = 6;
const FLAG_HEAD: u8 = 0x01;

#[derive(Debug, Clone, Copy)]
struct ClusterHeader {
    flags: u8,
    used: u8,
    next: Handle,
}

impl ClusterHeader {
    fn encode(&self) -> [u8; CLUSTER_HEADER] {
        let next = self.next.to_le_bytes();
        [self.flags, self.used, next[0], next[1], next[2], next[3]]
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            flags: bytes[0],
            used: bytes[1],
            next: i32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    fn is_head(&self) -> bool {
        self.flags & FLAG_HEAD != 0
    }
}

/// Cluster-addressed storage for term records
pub struct BlobStore {
    path: PathBuf,
    file: File,
    cluster_size: u32,
    cluster_count: u32,
    created: bool,
}

impl BlobStore {
    /// Open the store at `path`, creating it when missing
    pub fn open(path: &Path, cluster_size: u32) -> Result<Self> {
        if !(16..=HEADER_REGION).contains(&cluster_size) || !cluster_size.is_power_of_two() {
            return Err(IndexError::Precondition(
                "cluster size must be a power of two between 16 and 256",
            ));
        }

        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if !existed || len == 0 {
            let mut store = Self {
                path: path.to_path_buf(),
                file,
                cluster_size,
                cluster_count: 0,
                created: true,
            };
            store.write_header()?;
            return Ok(store);
        }

        let mut header = [0u8; 12];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)
            .map_err(|_| IndexError::format("blob store header is truncated"))?;
        if &header[..8] != MAGIC {
            return Err(IndexError::format("blob store has a foreign header"));
        }
        let stored_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if stored_size != cluster_size {
            return Err(IndexError::format(format!(
                "blob store cluster size is {}, expected {}",
                stored_size, cluster_size
            )));
        }

        // A torn trailing cluster is ignored; it was never linked
        let cluster_count = (len / cluster_size as u64) as u32;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            cluster_size,
            cluster_count,
            created: false,
        })
    }

    fn write_header(&mut self) -> Result<()> {
        let mut region = vec![0u8; HEADER_REGION as usize];
        region[..8].copy_from_slice(MAGIC);
        region[8..12].copy_from_slice(&self.cluster_size.to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&region)?;

        // Reserved signature cluster
        let reserved = vec![0u8; self.cluster_size as usize];
        self.file.write_all(&reserved)?;
        self.cluster_count = self.reserved_handle() as u32 + 1;
        Ok(())
    }

    /// True when `open` created a fresh, empty store
    pub fn was_created(&self) -> bool {
        self.created
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    /// Handle of the cluster that stores the index signature
    pub fn reserved_handle(&self) -> Handle {
        (HEADER_REGION / self.cluster_size) as Handle
    }

    fn payload_size(&self) -> usize {
        self.cluster_size as usize - CLUSTER_HEADER
    }

    fn cluster_pos(&self, handle: Handle) -> u64 {
        handle as u64 * self.cluster_size as u64
    }

    fn check_handle(&self, handle: Handle) -> Result<()> {
        if handle <= self.reserved_handle() || handle as u32 >= self.cluster_count {
            return Err(IndexError::format(format!(
                "handle {} is outside the blob store",
                handle
            )));
        }
        Ok(())
    }

    fn read_cluster(&mut self, handle: Handle) -> Result<(ClusterHeader, Vec<u8>)> {
        self.check_handle(handle)?;
        let mut buf = vec![0u8; self.cluster_size as usize];
        self.file.seek(SeekFrom::Start(self.cluster_pos(handle)))?;
        self.file.read_exact(&mut buf)?;
        let header = ClusterHeader::decode(&buf[..CLUSTER_HEADER]);
        if header.used as usize > self.payload_size() {
            return Err(IndexError::format(format!(
                "cluster {} claims {} used bytes",
                handle, header.used
            )));
        }
        Ok((header, buf))
    }

    fn write_cluster_header(&mut self, handle: Handle, header: ClusterHeader) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.cluster_pos(handle)))?;
        self.file.write_all(&header.encode())?;
        Ok(())
    }

    /// Write `bytes` into freshly allocated, linked clusters.
    /// Returns (first, last) handles of the new run.
    fn allocate_run(&mut self, bytes: &[u8], head: bool) -> Result<(Handle, Handle)> {
        let payload = self.payload_size();
        let clusters = bytes.len().div_ceil(payload).max(1);
        let first = self.cluster_count as Handle;
        let mut buf = Vec::with_capacity(clusters * self.cluster_size as usize);

        for (i, chunk_index) in (0..clusters).enumerate() {
            let start = chunk_index * payload;
            let chunk = &bytes[start.min(bytes.len())..(start + payload).min(bytes.len())];
            let next = if i + 1 < clusters { first + i as Handle + 1 } else { 0 };
            let header = ClusterHeader {
                flags: if head && i == 0 { FLAG_HEAD } else { 0 },
                used: chunk.len() as u8,
                next,
            };
            buf.extend_from_slice(&header.encode());
            buf.extend_from_slice(chunk);
            buf.resize((i + 1) * self.cluster_size as usize, 0);
        }

        self.file.seek(SeekFrom::Start(self.cluster_pos(first)))?;
        self.file.write_all(&buf)?;
        self.cluster_count += clusters as u32;
        Ok((first, first + clusters as Handle - 1))
    }

    /// Store `bytes` as a new chain. Returns (head, tail) handles.
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<(Handle, Handle)> {
        self.allocate_run(bytes, true)
    }

    /// Append `bytes` behind the chain whose last cluster is `tail`.
    /// Returns the new tail handle, which equals `tail` when nothing moved.
    pub fn append(&mut self, tail: Handle, bytes: &[u8]) -> Result<Handle> {
        let (mut header, _) = self.read_cluster(tail)?;
        if header.next != 0 {
            return Err(IndexError::format(format!(
                "cluster {} is not the tail of its chain",
                tail
            )));
        }

        let free = self.payload_size() - header.used as usize;
        let in_place = free.min(bytes.len());
        if in_place > 0 {
            let pos = self.cluster_pos(tail) + (CLUSTER_HEADER + header.used as usize) as u64;
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.write_all(&bytes[..in_place])?;
        }

        let rest = &bytes[in_place..];
        if rest.is_empty() {
            header.used += in_place as u8;
            self.write_cluster_header(tail, header)?;
            return Ok(tail);
        }

        // New clusters are written before the old tail links to them
        let (first, last) = self.allocate_run(rest, false)?;
        header.used += in_place as u8;
        header.next = first;
        self.write_cluster_header(tail, header)?;
        Ok(last)
    }

    /// Walk a chain from its head. Returns the handles in order.
    pub fn chain(&mut self, head: Handle) -> Result<Vec<Handle>> {
        let mut handles = Vec::new();
        let mut current = head;
        loop {
            let (header, _) = self.read_cluster(current)?;
            if handles.is_empty() && !header.is_head() {
                return Err(IndexError::format(format!("cluster {} is not a chain head", head)));
            }
            handles.push(current);
            if header.next == 0 {
                return Ok(handles);
            }
            if handles.len() >= self.cluster_count as usize || header.next <= current {
                return Err(IndexError::format(format!("chain at {} is cyclic", head)));
            }
            current = header.next;
        }
    }

    /// Last cluster of the chain starting at `head`
    pub fn tail_of(&mut self, head: Handle) -> Result<Handle> {
        let chain = self.chain(head)?;
        Ok(*chain.last().unwrap_or(&head))
    }

    /// Read all bytes stored in the chain starting at `head`
    pub fn read(&mut self, head: Handle) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for handle in self.chain(head)? {
            let (header, buf) = self.read_cluster(handle)?;
            bytes.extend_from_slice(&buf[CLUSTER_HEADER..CLUSTER_HEADER + header.used as usize]);
        }
        Ok(bytes)
    }

    /// Overwrite bytes at a logical position inside an existing chain
    pub fn write_at(&mut self, head: Handle, pos: usize, bytes: &[u8]) -> Result<()> {
        let mut skip = pos;
        let mut written = 0;
        for handle in self.chain(head)? {
            if written == bytes.len() {
                break;
            }
            let (header, _) = self.read_cluster(handle)?;
            let used = header.used as usize;
            if skip >= used {
                skip -= used;
                continue;
            }
            let n = (used - skip).min(bytes.len() - written);
            let file_pos = self.cluster_pos(handle) + (CLUSTER_HEADER + skip) as u64;
            self.file.seek(SeekFrom::Start(file_pos))?;
            self.file.write_all(&bytes[written..written + n])?;
            written += n;
            skip = 0;
        }

        if written != bytes.len() {
            return Err(IndexError::format(format!(
                "write at {} runs past the end of chain {}",
                pos, head
            )));
        }
        Ok(())
    }

    /// Every chain head in the store, in handle order
    pub fn heads(&mut self) -> Result<Vec<Handle>> {
        let first = self.reserved_handle() + 1;
        let cluster_size = self.cluster_size as usize;
        self.file.seek(SeekFrom::Start(self.cluster_pos(first)))?;

        let mut reader = BufReader::new(&mut self.file);
        let mut buf = vec![0u8; cluster_size];
        let mut heads = Vec::new();
        for handle in first..self.cluster_count as Handle {
            reader.read_exact(&mut buf)?;
            if ClusterHeader::decode(&buf[..CLUSTER_HEADER]).is_head() {
                heads.push(handle);
            }
        }
        Ok(heads)
    }

    /// Payload of the reserved signature cluster
    pub fn read_reserved(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.cluster_size as usize];
        self.file.seek(SeekFrom::Start(self.cluster_pos(self.reserved_handle())))?;
        self.file.read_exact(&mut buf)
            .map_err(|_| IndexError::format("signature cluster is missing"))?;
        Ok(buf)
    }

    pub fn write_reserved(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.cluster_size as usize {
            return Err(IndexError::Precondition("signature does not fit into one cluster"));
        }
        self.file.seek(SeekFrom::Start(self.cluster_pos(self.reserved_handle())))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Size of the store file in bytes
    pub fn len_bytes(&self) -> u64 {
        self.cluster_count as u64 * self.cluster_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> BlobStore {
        BlobStore::open(&dir.path().join("store.dat"), 64).unwrap()
    }

    #[test]
    fn test_new_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.was_created());
        assert_eq!(store.reserved_handle(), 4);
        assert_eq!(store.cluster_count(), 5);
    }

    #[test]
    fn test_alloc_and_read_multi_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let bytes: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let (head, tail) = store.alloc(&bytes).unwrap();
        assert_eq!(head, 5);
        // 58 payload bytes per cluster -> 4 clusters
        assert_eq!(tail, 8);
        assert_eq!(store.read(head).unwrap(), bytes);
        assert_eq!(store.tail_of(head).unwrap(), tail);
    }

    #[test]
    fn test_append_moves_tail_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let (head, tail) = store.alloc(&[1, 2, 3]).unwrap();

        let same = store.append(tail, &[4, 5]).unwrap();
        assert_eq!(same, tail);

        let big = vec![9u8; 100];
        let moved = store.append(same, &big).unwrap();
        assert_ne!(moved, tail);

        let mut expected = vec![1, 2, 3, 4, 5];
        expected.extend_from_slice(&big);
        assert_eq!(store.read(head).unwrap(), expected);
    }

    #[test]
    fn test_append_to_non_tail_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let (head, _) = store.alloc(&[0u8; 120]).unwrap();
        assert!(store.append(head, &[1]).unwrap_err().needs_rebuild());
    }

    #[test]
    fn test_write_at_spans_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let (head, _) = store.alloc(&[0u8; 100]).unwrap();
        store.write_at(head, 56, &[7, 7, 7, 7]).unwrap();
        let bytes = store.read(head).unwrap();
        assert_eq!(&bytes[56..60], &[7, 7, 7, 7]);
        assert!(store.write_at(head, 98, &[1, 1, 1, 1]).is_err());
    }

    #[test]
    fn test_heads_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        let (a, b) = {
            let mut store = BlobStore::open(&path, 64).unwrap();
            let (a, tail) = store.alloc(&[1u8; 70]).unwrap();
            let (b, _) = store.alloc(&[2u8; 10]).unwrap();
            store.append(tail, &[3u8; 80]).unwrap();
            store.flush().unwrap();
            (a, b)
        };

        let mut store = BlobStore::open(&path, 64).unwrap();
        assert!(!store.was_created());
        assert_eq!(store.heads().unwrap(), vec![a, b]);
        assert_eq!(store.read(b).unwrap(), vec![2u8; 10]);
        assert_eq!(store.read(a).unwrap().len(), 150);
    }

    #[test]
    fn test_cluster_size_mismatch_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.dat");
        drop(BlobStore::open(&path, 64).unwrap());
        let err = BlobStore::open(&path, 32).err().unwrap();
        assert!(err.needs_rebuild());
    }

    #[test]
    fn test_reserved_cluster_is_not_a_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        store.write_reserved(&[1, 2, 3]).unwrap();
        assert_eq!(&store.read_reserved().unwrap()[..3], &[1, 2, 3]);
        assert!(store.read(4).is_err());
        assert!(store.heads().unwrap().is_empty());
    }
}
