// Latency decomposition extractor
//
// Maps the hop-timing headers of a response onto a fixed set of latency
// components. Missing or unparsable headers become 0 in `HeaderReading::value`
// and nowhere else.

use crate::executor::{RequestOutcome, ResponseHeaders};

pub const BE_IN_TIME_HEADER: &str = "Be-In-Time";
pub const BE_OUT_TIME_HEADER: &str = "Be-Out-Time";

/// The ten latency components reported per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LatencyMetric {
    TargetResponseTime,
    RequestProcessingTime,
    ResponseProcessingTime,
    ForwardProxyToPlatform,
    PlatformToForwardProxy,
    PlatformToReverseProxy,
    ReverseProxyToBackend,
    BackendToReverseProxy,
    ReverseProxyToPlatform,
    BackendServerProcessing,
}

impl LatencyMetric {
    pub const ALL: [LatencyMetric; 10] = [
        LatencyMetric::TargetResponseTime,
        LatencyMetric::RequestProcessingTime,
        LatencyMetric::ResponseProcessingTime,
        LatencyMetric::ForwardProxyToPlatform,
        LatencyMetric::PlatformToForwardProxy,
        LatencyMetric::PlatformToReverseProxy,
        LatencyMetric::ReverseProxyToBackend,
        LatencyMetric::BackendToReverseProxy,
        LatencyMetric::ReverseProxyToPlatform,
        LatencyMetric::BackendServerProcessing,
    ];

    /// Trend metric name, as it appears in the report.
    pub fn name(self) -> &'static str {
        match self {
            LatencyMetric::TargetResponseTime => "target_response_time",
            LatencyMetric::RequestProcessingTime => "request_processing_time",
            LatencyMetric::ResponseProcessingTime => "response_processing_time",
            LatencyMetric::ForwardProxyToPlatform => "forwardProxy_to_Platform_time",
            LatencyMetric::PlatformToForwardProxy => "platform_to_forwardProxy_time",
            LatencyMetric::PlatformToReverseProxy => "plaformToReverseProxyLatency",
            LatencyMetric::ReverseProxyToBackend => "reverseProxyToBackendLatency",
            LatencyMetric::BackendToReverseProxy => "backendToReverseProxyLatency",
            LatencyMetric::ReverseProxyToPlatform => "reverseProxyToPlatformLatency",
            LatencyMetric::BackendServerProcessing => "backend_server_processing_time",
        }
    }

    /// Response header carrying this component, or `None` for the derived
    /// backend processing time.
    pub fn header(self) -> Option<&'static str> {
        match self {
            LatencyMetric::TargetResponseTime => Some("Targetresponsetime"),
            LatencyMetric::RequestProcessingTime => Some("Requestprocessingtime"),
            LatencyMetric::ResponseProcessingTime => Some("Responseprocessingtime"),
            LatencyMetric::ForwardProxyToPlatform => Some("ForwardProxyToPlatformLatency"),
            // Header names are the ones the proxies actually send, typos included.
            LatencyMetric::PlatformToForwardProxy => Some("PlaformToforwardProxyLatency"),
            LatencyMetric::PlatformToReverseProxy => Some("PlaformToReverseProxyLatency"),
            LatencyMetric::ReverseProxyToBackend => Some("ReverseProxyToBackendLatency"),
            LatencyMetric::BackendToReverseProxy => Some("BackendToReverseProxyLatency"),
            LatencyMetric::ReverseProxyToPlatform => Some("ReverseProxyToPlatformLatency"),
            LatencyMetric::BackendServerProcessing => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// What was found under one header name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaderReading {
    Numeric(f64),
    NonNumeric,
    Absent,
}

impl HeaderReading {
    pub fn read(headers: &ResponseHeaders, name: &str) -> Self {
        match headers.get(name) {
            None => HeaderReading::Absent,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => HeaderReading::Numeric(v),
                _ => HeaderReading::NonNumeric,
            },
        }
    }

    pub fn numeric(self) -> Option<f64> {
        match self {
            HeaderReading::Numeric(v) => Some(v),
            HeaderReading::NonNumeric | HeaderReading::Absent => None,
        }
    }

    /// Collapse to the value that gets recorded: `|v|` when numeric, otherwise 0.
    pub fn value(self) -> f64 {
        self.numeric().map(f64::abs).unwrap_or(0.0)
    }
}

/// One value per `LatencyMetric`, all non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySample {
    values: [f64; 10],
}

impl LatencySample {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: LatencyMetric) -> f64 {
        self.values[metric.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (LatencyMetric, f64)> + '_ {
        LatencyMetric::ALL.iter().map(move |&m| (m, self.get(m)))
    }
}

/// Backend processing time from the `Be-In-Time`/`Be-Out-Time` pair.
fn backend_processing(headers: &ResponseHeaders) -> HeaderReading {
    let inbound = HeaderReading::read(headers, BE_IN_TIME_HEADER);
    let outbound = HeaderReading::read(headers, BE_OUT_TIME_HEADER);
    match (inbound, outbound) {
        (HeaderReading::Numeric(i), HeaderReading::Numeric(o)) => {
            let elapsed = o - i;
            if elapsed.is_finite() {
                HeaderReading::Numeric(elapsed)
            } else {
                HeaderReading::NonNumeric
            }
        }
        (HeaderReading::Absent, _) | (_, HeaderReading::Absent) => HeaderReading::Absent,
        _ => HeaderReading::NonNumeric,
    }
}

/// Decompose the response headers into a latency sample.
pub fn extract_headers(headers: &ResponseHeaders) -> LatencySample {
    let mut sample = LatencySample::zero();
    for metric in LatencyMetric::ALL {
        let reading = match metric.header() {
            Some(name) => HeaderReading::read(headers, name),
            None => backend_processing(headers),
        };
        sample.values[metric.index()] = reading.value();
    }
    sample
}

/// Latency sample for a request outcome. Transport errors carry no headers and
/// therefore yield all zeros.
pub fn extract(outcome: &RequestOutcome) -> LatencySample {
    extract_headers(&outcome.headers)
}
