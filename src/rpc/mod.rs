//! gRPC surface for the list store.

use crate::store::StoreError;

pub mod client;
pub mod proto;
pub mod server;

pub fn status_from_store_error(err: StoreError) -> tonic::Status {
    match err {
        StoreError::EmptyList { .. } => tonic::Status::failed_precondition(err.to_string()),
        StoreError::IndexOutOfRange { .. } => tonic::Status::out_of_range(err.to_string()),
        StoreError::Persistence(_)
        | StoreError::CorruptSnapshot(_)
        | StoreError::CorruptRecord { .. }
        | StoreError::SchemaVersionMismatch { .. } => tonic::Status::internal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_grpc_codes() {
        let empty = status_from_store_error(StoreError::EmptyList { list_id: 3 });
        assert_eq!(empty.code(), tonic::Code::FailedPrecondition);
        assert_eq!(empty.message(), "list 3 is empty");

        let range = status_from_store_error(StoreError::IndexOutOfRange {
            list_id: 1,
            index: 5,
            len: 2,
        });
        assert_eq!(range.code(), tonic::Code::OutOfRange);

        let io = status_from_store_error(StoreError::Persistence(std::io::Error::other("disk")));
        assert_eq!(io.code(), tonic::Code::Internal);
    }
}
