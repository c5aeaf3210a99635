//! Index command implementation

use anyhow::Result;

use crate::indexer;
use crate::probe::ProbeRegistry;
use crate::store::SharedStore;

pub fn run(store: &SharedStore, registry: &ProbeRegistry) -> Result<()> {
    if registry.all_probes().is_empty() {
        println!("No sources enabled. Check your configuration.");
        return Ok(());
    }

    let report = indexer::index_all(store, registry)?;

    for source in &report.sources {
        let description = registry
            .get_probe(source.source)
            .map(|p| p.description())
            .unwrap_or("");
        println!("📡 {} ({})", source.source, description);

        if source.base_missing {
            println!("   Source directory not found, skipped\n");
            continue;
        }

        println!(
            "   {} added, {} updated, {} touched, {} unchanged, {} removed",
            source.added, source.updated, source.touched, source.unchanged, source.removed
        );
        if source.failed > 0 || source.empty > 0 {
            println!("   {} failed, {} empty", source.failed, source.empty);
        }
        if source.malformed_lines > 0 {
            println!("   {} malformed lines skipped", source.malformed_lines);
        }
        println!();
    }

    let total = crate::store::lock(store).session_count(None)?;
    println!("✅ {} sessions indexed in {} ms", total, report.duration_ms);
    Ok(())
}
