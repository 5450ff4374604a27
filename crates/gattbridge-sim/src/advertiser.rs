//! Periodic advertisement generators

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gattbridge_core::AdvertisementData;

/// Produces the signal strength of the n-th advertisement (1-based)
pub type RssiGenerator = Arc<dyn Fn(u64) -> f64 + Send + Sync>;

/// Emits the same advertisement at a fixed interval with a generated RSSI.
///
/// A central simulation drives the timer; the advertiser only describes what
/// is sent and how often.
#[derive(Clone)]
pub struct Advertiser {
    interval: Duration,
    advertisement_data: AdvertisementData,
    rssi: RssiGenerator,
}

impl Advertiser {
    pub fn new(interval: Duration, advertisement_data: AdvertisementData) -> Self {
        Self {
            interval,
            advertisement_data,
            rssi: Arc::new(|_| random_rssi()),
        }
    }

    pub fn with_rssi_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(u64) -> f64 + Send + Sync + 'static,
    {
        self.rssi = Arc::new(generator);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn advertisement_data(&self) -> &AdvertisementData {
        &self.advertisement_data
    }

    /// Packet number `event` of this advertiser
    pub fn emit(&self, event: u64) -> (AdvertisementData, f64) {
        (self.advertisement_data.clone(), (self.rssi)(event))
    }
}

impl fmt::Debug for Advertiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advertiser")
            .field("interval", &self.interval)
            .field("advertisement_data", &self.advertisement_data)
            .finish_non_exhaustive()
    }
}

/// Empty advertisement every second with a random RSSI in [-100, 0]
pub fn basic_advertiser() -> Advertiser {
    Advertiser::new(Duration::from_secs(1), AdvertisementData::new())
}

fn random_rssi() -> f64 {
    -100.0 * fastrand::f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_advertiser_rssi_in_range() {
        let advertiser = basic_advertiser();
        assert_eq!(advertiser.interval(), Duration::from_secs(1));
        for event in 1..=200 {
            let (data, rssi) = advertiser.emit(event);
            assert_eq!(data, AdvertisementData::new());
            assert!((-100.0..=0.0).contains(&rssi), "rssi {} out of range", rssi);
        }
    }

    #[test]
    fn test_generator_sees_event_number() {
        let advertiser = Advertiser::new(
            Duration::from_millis(100),
            AdvertisementData::new().with_local_name("tag"),
        )
        .with_rssi_generator(|event| -(event as f64));

        assert_eq!(advertiser.emit(3).1, -3.0);
        assert_eq!(advertiser.emit(7).0.local_name(), Some("tag"));
    }
}
