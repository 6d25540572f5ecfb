use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

/// Size and content counters of an open text index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub path: PathBuf,
    pub documents: usize,
    pub terms: usize,
    /// Terms with a chain in the store
    pub records: usize,
    pub store_bytes: u64,
    pub pending_documents: usize,
    pub format_version: i32,
    /// Creation time of the store (signature timestamp, unix millis)
    pub created_at_ms: i64,
}

impl IndexStats {
    /// Display index statistics
    pub fn print(&self) {
        println!("Index Statistics");
        println!("================");
        println!();
        println!("Index location:   {}", self.path.display());
        println!("Format version:   {}", self.format_version);
        println!("Document count:   {}", self.documents);
        println!("Distinct terms:   {}", self.terms);
        println!("Term chains:      {}", self.records);
        if self.pending_documents > 0 {
            println!("Pending docs:     {}", self.pending_documents);
        }
        println!();
        println!("Store size:       {}", format_size(self.store_bytes));
        if self.documents > 0 {
            println!(
                "Per document:     {}",
                format_size(self.store_bytes / self.documents as u64)
            );
        }
        println!();
        println!("Created:          {}", format_timestamp(self.created_at_ms));
    }
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format unix timestamp in milliseconds
fn format_timestamp(ms: i64) -> String {
    let datetime = UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64);
    format!("{:?}", datetime)
}
