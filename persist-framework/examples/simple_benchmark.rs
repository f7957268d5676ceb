/*!
Simple benchmark example for hyperfine performance testing.

Persists a batch of property sets to a local file in each sub-format and
reads it back, printing timings and file sizes.
*/

use persist_framework::{
    LocalFileStorage, Persistable, Persistence, Policy, PropertySet, Storage,
};
use std::time::Instant;

fn sample_visits(count: i64) -> Vec<PropertySet> {
    (0..count)
        .map(|id| {
            PropertySet::new()
                .with("visitId", 903_000 + id)
                .with("filter", ["u", "g", "r", "i", "z", "y"][(id % 6) as usize])
                .with("exposureTime", 30.0)
                .with("airmass", 1.0 + id as f64 / 1000.0)
                .with("calibrated", id % 3 == 0)
                .with("observer", "summit-night-crew")
        })
        .collect()
}

fn main() -> persist_framework::Result<()> {
    persist_framework::observability::init_observability(false)?;

    let temp_dir = tempfile::TempDir::new()?;
    let visits = sample_visits(1_000);
    let refs: Vec<&dyn Persistable> = visits.iter().map(|v| v as &dyn Persistable).collect();

    for (format, compressed) in [("text", false), ("binary", false), ("binary", true)] {
        let policy = Policy::builder()
            .set("Formatter.PropertySet.format", format)
            .set("Formatter.PropertySet.compression.enabled", compressed)
            .build();
        let persistence = Persistence::new(policy)?;
        let file_name = format!("visits-{format}-{compressed}.dat");
        let mut storage = LocalFileStorage::with_base_dir(temp_dir.path(), &file_name);

        let start = Instant::now();
        persistence.persist_batch(&refs, &mut storage, &PropertySet::new())?;
        let restored = persistence.retrieve_all("PropertySet", &mut storage, &PropertySet::new())?;
        let duration = start.elapsed();

        assert_eq!(restored.len(), visits.len());
        let size = std::fs::metadata(storage.path())?.len();
        println!(
            "{format:>6} (gzip: {compressed:<5}) {:>10?}  {size:>8} bytes  exists: {}",
            duration,
            storage.exists()
        );
    }
    Ok(())
}
