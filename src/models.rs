//! Data models shared by the simulation loops, the batch builder and the sinks.

use std::collections::BTreeMap;

use crate::error::PointError;

// ---

/// Constant `status` field written with every point.
pub const POINT_STATUS: &str = "1";

/// Constant `prefix_data` field written with every point.
pub const PREFIX_DATA: f64 = 0.0;

/// Identity of one station row. Opaque strings used only as point tags;
/// empty ids are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationTags {
    // ---
    pub device_module_id: String,
    pub station_id: String,
    pub station_gateway_id: String,
    pub device_id: String,
}

impl StationTags {
    // ---
    pub fn to_map(&self) -> BTreeMap<String, String> {
        // ---
        BTreeMap::from([
            ("station_id".to_string(), self.station_id.clone()),
            (
                "station_gateway_id".to_string(),
                self.station_gateway_id.clone(),
            ),
            ("device_id".to_string(), self.device_id.clone()),
            ("device_module_id".to_string(), self.device_module_id.clone()),
        ])
    }
}

/// Policy governing how a device's simulated value evolves between cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimulationMode {
    /// Value is pinned (offline device or manual override).
    Fixed,
    /// Independent uniform draw from `[min, max]` each cycle.
    UniformRange,
    /// Small bounded steps from the previous value.
    #[default]
    RandomWalk,
}

impl SimulationMode {
    /// Map the topology status column onto a mode.
    ///
    /// `1` pins the value, `2` draws uniformly, anything else random-walks.
    pub fn from_status(status: &str) -> Self {
        // ---
        match status.trim().to_ascii_lowercase().as_str() {
            "1" | "fixed" => SimulationMode::Fixed,
            "2" | "uniform" | "uniform_range" => SimulationMode::UniformRange,
            _ => SimulationMode::RandomWalk,
        }
    }
}

/// A simulated sensor and its persistent state.
///
/// `current_value` is the only mutable part; it is overwritten at the end of
/// every device cycle and carried into the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    // ---
    pub tags: StationTags,
    pub value_min: f64,
    pub value_max: f64,
    pub current_value: f64,
    pub mode: SimulationMode,
}

/// Which observation value an enrichment row publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentKind {
    Temperature,
    Humidity,
}

impl EnrichmentKind {
    /// Returns `None` for kinds that produce no point.
    pub fn parse(raw: &str) -> Option<Self> {
        // ---
        match raw.trim().to_ascii_lowercase().as_str() {
            "temp" | "temperature" => Some(EnrichmentKind::Temperature),
            "humidity" => Some(EnrichmentKind::Humidity),
            _ => None,
        }
    }
}

/// Station coordinates that are enriched with weather data.
///
/// Longitude and latitude are kept verbatim; they form the cache key and the
/// query parameters and are never parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentTarget {
    // ---
    pub tags: StationTags,
    pub longitude: String,
    pub latitude: String,
    pub kind: Option<EnrichmentKind>,
}

/// Weather at a coordinate pair as reported by the lookup API.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherObservation {
    // ---
    pub temperature: f64,
    pub humidity_percent: f64,
}

impl WeatherObservation {
    // ---
    pub fn value_for(&self, kind: EnrichmentKind) -> f64 {
        // ---
        match kind {
            EnrichmentKind::Temperature => self.temperature,
            EnrichmentKind::Humidity => self.humidity_percent,
        }
    }
}

/// Fixed field set of a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFields {
    // ---
    pub data: f64,
    pub status: &'static str,
    pub prefix_data: f64,
}

/// One timestamped, tagged datum destined for the time-series store.
///
/// Validated when built and immutable afterwards, so sinks never see a
/// malformed shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    // ---
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: PointFields,
    timestamp_millis: i64,
}

impl PointRecord {
    // ---
    pub fn new(
        measurement: &str,
        tags: &StationTags,
        data: f64,
        timestamp_millis: i64,
    ) -> Result<Self, PointError> {
        // ---
        if measurement.trim().is_empty() {
            return Err(PointError::EmptyMeasurement);
        }

        if !data.is_finite() {
            return Err(PointError::NonFiniteField {
                field: "data",
                value: data,
            });
        }

        Ok(PointRecord {
            measurement: measurement.to_string(),
            tags: tags.to_map(),
            fields: PointFields {
                data,
                status: POINT_STATUS,
                prefix_data: PREFIX_DATA,
            },
            timestamp_millis,
        })
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &PointFields {
        &self.fields
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;

    pub(crate) fn station_tags(device_id: &str) -> StationTags {
        // ---
        StationTags {
            device_module_id: "module-01".to_string(),
            station_id: "station-A".to_string(),
            station_gateway_id: "gw-7".to_string(),
            device_id: device_id.to_string(),
        }
    }

    #[test]
    fn test_mode_from_status() {
        // ---
        assert_eq!(SimulationMode::from_status("1"), SimulationMode::Fixed);
        assert_eq!(
            SimulationMode::from_status("2"),
            SimulationMode::UniformRange
        );
        assert_eq!(
            SimulationMode::from_status(" uniform "),
            SimulationMode::UniformRange
        );
        assert_eq!(SimulationMode::from_status("3"), SimulationMode::RandomWalk);
        assert_eq!(SimulationMode::from_status(""), SimulationMode::RandomWalk);
        assert_eq!(
            SimulationMode::from_status("status"),
            SimulationMode::RandomWalk
        );
    }

    #[test]
    fn test_enrichment_kind_parse() {
        // ---
        assert_eq!(
            EnrichmentKind::parse("temp"),
            Some(EnrichmentKind::Temperature)
        );
        assert_eq!(
            EnrichmentKind::parse("Temperature"),
            Some(EnrichmentKind::Temperature)
        );
        assert_eq!(
            EnrichmentKind::parse("humidity"),
            Some(EnrichmentKind::Humidity)
        );
        assert_eq!(EnrichmentKind::parse("pressure"), None);
    }

    #[test]
    fn test_point_record_constant_fields() {
        // ---
        let point = PointRecord::new("device_data", &station_tags("dev-1"), 12.5, 1_700_000_000_000)
            .unwrap();

        assert_eq!(point.measurement(), "device_data");
        assert_eq!(point.fields().data, 12.5);
        assert_eq!(point.fields().status, "1");
        assert_eq!(point.fields().prefix_data, 0.0);
        assert_eq!(point.timestamp_millis(), 1_700_000_000_000);

        assert_eq!(point.tag("station_id"), Some("station-A"));
        assert_eq!(point.tag("station_gateway_id"), Some("gw-7"));
        assert_eq!(point.tag("device_id"), Some("dev-1"));
        assert_eq!(point.tag("device_module_id"), Some("module-01"));
        assert_eq!(point.tags().len(), 4);
    }

    #[test]
    fn test_point_record_rejects_malformed_shapes() {
        // ---
        let tags = station_tags("dev-1");

        assert!(matches!(
            PointRecord::new("", &tags, 1.0, 0),
            Err(PointError::EmptyMeasurement)
        ));
        assert!(matches!(
            PointRecord::new("m", &tags, f64::NAN, 0),
            Err(PointError::NonFiniteField { field: "data", .. })
        ));
        assert!(PointRecord::new("m", &tags, f64::INFINITY, 0).is_err());
    }

    #[test]
    fn test_point_record_keeps_empty_tag_values() {
        // ---
        let mut tags = station_tags("dev-1");
        tags.station_gateway_id = String::new();

        let point = PointRecord::new("device_data", &tags, 3.0, 10).unwrap();

        assert_eq!(point.tag("station_gateway_id"), Some(""));
        assert_eq!(point.tags().len(), 4);
    }

    #[test]
    fn test_observation_value_for_kind() {
        // ---
        let obs = WeatherObservation {
            temperature: 21.3,
            humidity_percent: 64.0,
        };
        assert_eq!(obs.value_for(EnrichmentKind::Temperature), 21.3);
        assert_eq!(obs.value_for(EnrichmentKind::Humidity), 64.0);
        assert_eq!(WeatherObservation::default().temperature, 0.0);
    }
}
