//! Paginated listing of study environments, datasets and dataset versions.
//!
//! A listing call is described by a [ListSpec]. The spec can be collected eagerly,
//! or driven lazily one page at a time through a [Pager] or a stream of records.
//! Pages are requested strictly in order, and page N+1 is only requested after
//! page N has been consumed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use arrow_flight::{Criteria, FlightInfo};
use cohort_common::config::{LIST_PAGE_SIZE_DEFAULT, LIST_PAGE_SIZE_SERVER_DEFINED};
use cohort_telemetry::common::SpanAttribute;
use fastrace::future::FutureExt;
use fastrace::Span;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::DatasetRef;
use crate::error::{ClientError, ClientResult};
use crate::ticket::DatasetTicket;
use crate::transport::FlightTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightType {
    StudyEnvironments,
    Datasets,
    Versions,
}

impl fmt::Display for FlightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightType::StudyEnvironments => "STUDY_ENVIRONMENTS",
            FlightType::Datasets => "DATASETS",
            FlightType::Versions => "VERSIONS",
        };
        f.write_str(name)
    }
}

/// The criteria of a listing call, sent to the service as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCriteria {
    pub flight_type: FlightType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_environment_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_dataset_name: Option<String>,
    /// The number of records per page.
    /// [LIST_PAGE_SIZE_SERVER_DEFINED] leaves paging to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
    /// The 1-based page number, managed by the lister.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
}

impl ListCriteria {
    pub fn new(flight_type: FlightType) -> Self {
        Self {
            flight_type,
            study_uuid: None,
            study_environment_uuid: None,
            dataset_uuid: None,
            search_dataset_name: None,
            page_size: None,
            page: None,
        }
    }

    pub fn study_environments(study_uuid: impl Into<String>) -> Self {
        Self {
            study_uuid: Some(study_uuid.into()),
            ..Self::new(FlightType::StudyEnvironments)
        }
    }

    pub fn datasets(
        study_uuid: impl Into<String>,
        study_environment_uuid: impl Into<String>,
    ) -> Self {
        Self {
            study_uuid: Some(study_uuid.into()),
            study_environment_uuid: Some(study_environment_uuid.into()),
            ..Self::new(FlightType::Datasets)
        }
    }

    pub fn versions(
        study_uuid: impl Into<String>,
        study_environment_uuid: impl Into<String>,
        dataset_uuid: impl Into<String>,
    ) -> Self {
        Self {
            study_uuid: Some(study_uuid.into()),
            study_environment_uuid: Some(study_environment_uuid.into()),
            dataset_uuid: Some(dataset_uuid.into()),
            ..Self::new(FlightType::Versions)
        }
    }

    pub fn with_search_dataset_name(self, name: impl Into<String>) -> Self {
        Self {
            search_dataset_name: Some(name.into()),
            ..self
        }
    }

    pub fn with_page_size(self, page_size: i64) -> Self {
        Self {
            page_size: Some(page_size),
            ..self
        }
    }

    pub fn to_flight_criteria(&self) -> ClientResult<Criteria> {
        Ok(Criteria {
            expression: serde_json::to_vec(self)?.into(),
        })
    }

    fn is_server_paged(&self) -> bool {
        self.page_size == Some(LIST_PAGE_SIZE_SERVER_DEFINED)
    }
}

/// Reads the record total of a listed flight.
/// Flight reports an unknown total as -1, and some services leave the
/// protobuf default of 0, so only positive totals are known.
fn reported_total_records(info: &FlightInfo) -> Option<u64> {
    u64::try_from(info.total_records).ok().filter(|&total| total > 0)
}

/// Converts a page budget where any negative value means "unbounded".
pub fn max_pages_from(value: i64) -> Option<usize> {
    usize::try_from(value).ok()
}

/// One listed resource.
#[derive(Debug, Clone)]
pub struct FlightRecord {
    /// The JSON object carried by the ticket of the flight.
    pub fields: Map<String, Value>,
    /// The total number of records reported by the service, if known.
    pub total_records: Option<u64>,
    /// A reference to the dataset when the record describes one.
    pub dataset: Option<DatasetRef>,
}

impl FlightRecord {
    pub fn from_flight_info(
        info: &FlightInfo,
        transport: &Arc<dyn FlightTransport>,
    ) -> ClientResult<Self> {
        let ticket = info
            .endpoint
            .iter()
            .find_map(|endpoint| endpoint.ticket.as_ref())
            .ok_or_else(|| ClientError::invalid("listed flight has no ticket"))?;
        let text = std::str::from_utf8(&ticket.ticket)
            .map_err(|e| ClientError::invalid(format!("ticket is not valid UTF-8: {e}")))?;
        let fields = match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => fields,
            other => {
                return Err(ClientError::invalid(format!(
                    "ticket is not a JSON object: {other}"
                )))
            }
        };
        let total_records = reported_total_records(info);
        let dataset = if fields.contains_key("dataset_uuid") {
            match serde_json::from_value::<DatasetTicket>(Value::Object(fields.clone())) {
                Ok(ticket) => Some(DatasetRef::new(Arc::clone(transport), ticket)),
                Err(e) => {
                    warn!("listed dataset has an incomplete ticket: {e}");
                    None
                }
            }
        } else {
            None
        };
        Ok(Self {
            fields,
            total_records,
            dataset,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

struct Page {
    records: Vec<FlightRecord>,
    /// The number of items received, including the ones that failed to decode.
    item_count: usize,
    total_records: Option<u64>,
}

/// Drives a listing call one page at a time.
pub struct Pager {
    transport: Arc<dyn FlightTransport>,
    criteria: ListCriteria,
    max_pages: Option<usize>,
    pages_requested: usize,
    processed: u64,
    total_records: Option<u64>,
    finished: bool,
}

impl Pager {
    pub fn new(
        transport: Arc<dyn FlightTransport>,
        criteria: ListCriteria,
        max_pages: Option<usize>,
    ) -> Self {
        Self {
            transport,
            criteria,
            max_pages,
            pages_requested: 0,
            processed: 0,
            total_records: None,
            finished: false,
        }
    }

    pub fn pages_requested(&self) -> usize {
        self.pages_requested
    }

    pub fn total_records(&self) -> Option<u64> {
        self.total_records
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Requests the next page.
    /// Returns `None` once the listing is exhausted, the page budget is spent,
    /// or a page request fails.
    pub async fn next_page(&mut self) -> Option<Vec<FlightRecord>> {
        if self.finished {
            return None;
        }
        if self
            .max_pages
            .is_some_and(|max| self.pages_requested >= max)
        {
            self.finished = true;
            return None;
        }
        if self
            .total_records
            .is_some_and(|total| self.processed >= total)
        {
            self.finished = true;
            return None;
        }

        self.pages_requested += 1;
        self.criteria.page = Some(self.pages_requested as u64);
        if self.criteria.page_size.is_none() {
            self.criteria.page_size = Some(LIST_PAGE_SIZE_DEFAULT);
        }

        let page_number = self.pages_requested.to_string();
        let span = Span::enter_with_local_parent("Pager::next_page").with_properties(|| {
            [
                (
                    SpanAttribute::LISTING_FLIGHT_TYPE,
                    self.criteria.flight_type.to_string(),
                ),
                (SpanAttribute::LISTING_PAGE, page_number),
            ]
        });
        let page = match self.fetch_page().in_span(span).await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "failed to list page {} of {}: {e}",
                    self.pages_requested, self.criteria.flight_type
                );
                self.finished = true;
                return None;
            }
        };
        debug!(
            "listed page {} of {} with {} item(s)",
            self.pages_requested, self.criteria.flight_type, page.item_count
        );

        if page.item_count == 0 {
            self.finished = true;
            return None;
        }
        self.processed += page.item_count as u64;
        if self.total_records.is_none() {
            self.total_records = page.total_records;
        }
        if self.criteria.is_server_paged() {
            self.finished = true;
        }
        Some(page.records)
    }

    async fn fetch_page(&self) -> ClientResult<Page> {
        let mut stream = self
            .transport
            .list_flights(self.criteria.to_flight_criteria()?)
            .await?;
        let mut page = Page {
            records: vec![],
            item_count: 0,
            total_records: None,
        };
        while let Some(info) = stream.next().await {
            let info = info?;
            page.item_count += 1;
            if page.total_records.is_none() {
                page.total_records = reported_total_records(&info);
            }
            match FlightRecord::from_flight_info(&info, &self.transport) {
                Ok(record) => page.records.push(record),
                Err(e) => warn!("skipping listed item that failed to decode: {e}"),
            }
        }
        Ok(page)
    }
}

/// The description of a listing call.
/// Every stream or pager created from the spec starts from the first page.
#[derive(Clone)]
pub struct ListSpec {
    transport: Arc<dyn FlightTransport>,
    criteria: ListCriteria,
    max_pages: Option<usize>,
}

impl fmt::Debug for ListSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSpec")
            .field("criteria", &self.criteria)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl ListSpec {
    pub fn new(transport: Arc<dyn FlightTransport>, criteria: ListCriteria) -> Self {
        Self {
            transport,
            criteria,
            max_pages: None,
        }
    }

    pub fn with_max_pages(self, max_pages: Option<usize>) -> Self {
        Self { max_pages, ..self }
    }

    pub fn criteria(&self) -> &ListCriteria {
        &self.criteria
    }

    pub fn max_pages(&self) -> Option<usize> {
        self.max_pages
    }

    pub fn pager(&self) -> Pager {
        Pager::new(
            Arc::clone(&self.transport),
            self.criteria.clone(),
            self.max_pages,
        )
    }

    /// Runs the whole listing and returns the records of all pages in order.
    pub async fn collect(&self) -> Vec<FlightRecord> {
        let mut pager = self.pager();
        let mut records = vec![];
        while let Some(page) = pager.next_page().await {
            records.extend(page);
        }
        records
    }

    /// Returns the records as a stream that requests pages on demand.
    pub fn stream(&self) -> BoxStream<'static, FlightRecord> {
        stream::unfold(
            (self.pager(), VecDeque::new()),
            |(mut pager, mut buffer)| async move {
                loop {
                    if let Some(record) = buffer.pop_front() {
                        return Some((record, (pager, buffer)));
                    }
                    buffer.extend(pager.next_page().await?);
                }
            },
        )
        .boxed()
    }

    /// Applies `f` to each record and keeps the non-`None` results.
    /// Stops requesting pages once `limit` results have been kept.
    pub async fn filter_map<T, F>(&self, limit: Option<usize>, mut f: F) -> Vec<T>
    where
        F: FnMut(FlightRecord) -> Option<T>,
    {
        let mut output = vec![];
        if limit == Some(0) {
            return output;
        }
        let mut records = self.stream();
        while let Some(record) = records.next().await {
            if let Some(value) = f(record) {
                output.push(value);
                if limit.is_some_and(|n| output.len() >= n) {
                    break;
                }
            }
        }
        output
    }
}

/// The result of a listing call.
#[derive(Debug)]
pub enum Listing {
    Records(Vec<FlightRecord>),
    Lazy(ListSpec),
}

impl Listing {
    /// Returns the records, running the listing first if it is lazy.
    pub async fn into_records(self) -> Vec<FlightRecord> {
        match self {
            Listing::Records(records) => records,
            Listing::Lazy(spec) => spec.collect().await,
        }
    }
}

/// Lists the resources matching the criteria.
/// An eager listing runs all pages now, while a lazy one returns the spec to run later.
pub async fn list(
    transport: Arc<dyn FlightTransport>,
    criteria: ListCriteria,
    max_pages: Option<usize>,
    eager: bool,
) -> Listing {
    let spec = ListSpec::new(transport, criteria).with_max_pages(max_pages);
    if eager {
        Listing::Records(spec.collect().await)
    } else {
        Listing::Lazy(spec)
    }
}
