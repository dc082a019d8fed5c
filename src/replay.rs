use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio::time::{sleep, Duration};

use crate::error::Result;
use crate::sensors::ScriptedProvider;
use crate::types::RawSample;

/// Load a recorded fix log: a JSON array of [`RawSample`], optionally `.gz`.
pub fn load_samples(path: &Path) -> Result<Vec<RawSample>> {
    let file = File::open(path)?;
    let samples: Vec<RawSample> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        serde_json::from_reader(BufReader::new(gz))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };
    debug!("[replay] loaded {} fixes from {}", samples.len(), path.display());
    Ok(samples)
}

/// Feed samples to the provider, spaced by their recorded timestamps divided
/// by `speedup`. Stops early once nobody is subscribed. Returns fixes delivered.
pub async fn replay_into(provider: &ScriptedProvider, samples: &[RawSample], speedup: f64) -> usize {
    let speedup = if speedup > 0.0 { speedup } else { 1.0 };
    let mut delivered = 0;
    let mut previous: Option<DateTime<Utc>> = None;

    for sample in samples {
        if let Some(prev) = previous {
            let gap = (sample.timestamp - prev)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64();
            if gap > 0.0 {
                sleep(Duration::from_secs_f64(gap / speedup)).await;
            }
        }
        previous = Some(sample.timestamp);

        if !provider.push(sample.clone()).await {
            break;
        }
        delivered += 1;
    }

    info!("[replay] delivered {}/{} fixes", delivered, samples.len());
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::LocationProvider;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn samples() -> Vec<RawSample> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
        (0..3)
            .map(|i| RawSample::new(0.0001 * i as f64, 0.0, 5.0, t0 + chrono::Duration::seconds(i)))
            .collect()
    }

    #[test]
    fn test_load_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_vec(&samples()).unwrap();

        let plain = dir.path().join("run.json");
        std::fs::write(&plain, &json).unwrap();
        assert_eq!(load_samples(&plain).unwrap(), samples());

        let gz = dir.path().join("run.json.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(&json).unwrap();
        encoder.finish().unwrap();
        assert_eq!(load_samples(&gz).unwrap(), samples());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_samples(Path::new("/nonexistent/run.json")).is_err());
    }

    #[tokio::test]
    async fn test_replay_stops_without_subscriber() {
        let provider = ScriptedProvider::new(None);
        assert_eq!(replay_into(&provider, &samples(), 1000.0).await, 0);
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order() {
        let provider = ScriptedProvider::new(None);
        let mut sub = provider.subscribe().unwrap();
        assert_eq!(replay_into(&provider, &samples(), 1000.0).await, 3);

        for expected in samples() {
            assert_eq!(sub.samples.recv().await.unwrap().unwrap(), expected);
        }
    }
}
