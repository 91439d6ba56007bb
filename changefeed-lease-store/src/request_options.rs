use changefeed_core::store::RequestOptions;

/// Produces the store request options for a lease-store document.
/// Plug a custom factory in when the lease container is partitioned differently.
pub trait RequestOptionsFactory: Send + Sync {
    fn create_request_options(&self, document_id: &str) -> RequestOptions;
}

/// Every lease-store document lives in a single logical partition.
#[derive(Debug, Clone, Default)]
pub struct SinglePartitionRequestOptionsFactory;

impl RequestOptionsFactory for SinglePartitionRequestOptionsFactory {
    fn create_request_options(&self, _document_id: &str) -> RequestOptions {
        RequestOptions::default()
    }
}

/// The lease container is partitioned by document id.
#[derive(Debug, Clone, Default)]
pub struct PartitionedByIdRequestOptionsFactory;

impl RequestOptionsFactory for PartitionedByIdRequestOptionsFactory {
    fn create_request_options(&self, document_id: &str) -> RequestOptions {
        RequestOptions::default().with_partition_key(document_id)
    }
}
