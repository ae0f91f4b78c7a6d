/// W3C Trace Context header names used for context propagation
/// to the data service.
pub struct ContextPropagationHeader;

impl ContextPropagationHeader {
    pub const TRACEPARENT: &'static str = "traceparent";
}

/// Common span attribute names.
/// The names either follow the OpenTelemetry semantic conventions,
/// or are specific to the Cohort client.
pub struct SpanAttribute;

impl SpanAttribute {
    pub const SPAN_KIND: &'static str = "span.kind";
    pub const RPC_METHOD: &'static str = "rpc.method";
    pub const LISTING_FLIGHT_TYPE: &'static str = "listing.flight_type";
    pub const LISTING_PAGE: &'static str = "listing.page";
    pub const DATASET_UUID: &'static str = "dataset.uuid";
    pub const PUBLISH_COMMAND: &'static str = "publish.command";
}

/// The OpenTelemetry span kinds.
pub struct SpanKind;

impl SpanKind {
    pub const CLIENT: &'static str = "client";
    pub const INTERNAL: &'static str = "internal";
}
