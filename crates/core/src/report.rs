//! Savings report rendering.
//!
//! Turns a statistics snapshot into the multi-line text block emitted
//! periodically and at shutdown. Rendering is kept separate from any
//! logging sink so the embedder decides where it goes.

use std::fmt::Write;

use crate::store::ReportSnapshot;

/// Render the periodic savings report.
pub fn render(snapshot: &ReportSnapshot) -> String {
    let mut out = String::new();
    let total_asset = snapshot.hits + snapshot.misses;
    let hit_ratio = if total_asset > 0 { 100.0 * snapshot.hits as f64 / total_asset as f64 } else { 0.0 };

    let _ = writeln!(out, "edge cache report");
    let _ = writeln!(
        out,
        "  assets: {} served from cache ({} via 304), {} fetched, {:.1}% hit ratio",
        snapshot.hits, snapshot.revalidated, snapshot.misses, hit_ratio
    );
    let _ = writeln!(out, "  documents: {} revalidated from cache, {} fetched", snapshot.doc_hits, snapshot.doc_misses);
    let _ = writeln!(
        out,
        "  saved: {} body / {} wire; fetched: {} body / {} wire",
        format_bytes(snapshot.body_bytes_saved),
        format_bytes(snapshot.wire_bytes_saved),
        format_bytes(snapshot.body_bytes_fetched),
        format_bytes(snapshot.wire_bytes_fetched),
    );
    if snapshot.dedup_puts > 0 {
        let _ = writeln!(out, "  deduplicated puts: {}", snapshot.dedup_puts);
    }

    if !snapshot.per_origin.is_empty() {
        let _ = writeln!(out, "  by origin:");
        for (origin, counters) in &snapshot.per_origin {
            let _ = writeln!(
                out,
                "    {:<12} {:>6} hits {:>6} misses  {} saved",
                origin,
                counters.hits,
                counters.misses,
                format_bytes(counters.bytes_saved)
            );
        }
    }
    if !snapshot.per_type.is_empty() {
        let _ = writeln!(out, "  by type:");
        for (resource_type, counters) in &snapshot.per_type {
            let _ = writeln!(
                out,
                "    {:<12} {:>6} hits {:>6} misses  {} saved",
                resource_type,
                counters.hits,
                counters.misses,
                format_bytes(counters.bytes_saved)
            );
        }
    }
    if !snapshot.top_prefixes.is_empty() {
        let _ = writeln!(out, "  top sources:");
        for (prefix, bytes) in &snapshot.top_prefixes {
            let _ = writeln!(out, "    {:>10}  {}", format_bytes(*bytes), prefix);
        }
    }

    out
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{value:.1} {}", UNITS[unit]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CacheStats;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_render_sections() {
        let stats = CacheStats::default();
        stats.hit("https://cdn.example/a.js", "script", "third-party", 1000, 400);
        stats.revalidated("https://cdn.example/b.css", "stylesheet", "third-party", 2000, 800);
        stats.miss("https://cdn.example/c.js", "script", "third-party", 500, 200);
        stats.doc_hit("https://news.example/", 4096, 1024);

        let report = render(&stats.snapshot());
        assert!(report.contains("edge cache report"));
        assert!(report.contains("2 served from cache (1 via 304)"));
        assert!(report.contains("1 revalidated from cache"));
        assert!(report.contains("by origin:"));
        assert!(report.contains("third-party"));
        assert!(report.contains("stylesheet"));
        assert!(report.contains("top sources:"));
    }

    #[test]
    fn test_render_empty_snapshot() {
        let report = render(&CacheStats::default().snapshot());
        assert!(report.contains("0.0% hit ratio"));
        assert!(!report.contains("by origin:"));
        assert!(!report.contains("deduplicated"));
    }
}
