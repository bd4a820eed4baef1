use std::sync::Arc;

use crate::{
    rpc::{
        proto::remotelist::{
            AppendRequest, AppendResponse, GetRequest, GetResponse, RemoveRequest, RemoveResponse,
            SizeRequest, SizeResponse,
            list_service_server::{ListService, ListServiceServer},
        },
        status_from_store_error,
    },
    store::ListStore,
};

#[derive(Debug, Clone)]
pub struct RemoteListService {
    store: Arc<ListStore>,
}

impl RemoteListService {
    pub fn new(store: Arc<ListStore>) -> Self {
        Self { store }
    }

    pub fn into_server(self) -> ListServiceServer<Self> {
        ListServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl ListService for RemoteListService {
    async fn append(
        &self,
        request: tonic::Request<AppendRequest>,
    ) -> Result<tonic::Response<AppendResponse>, tonic::Status> {
        let req = request.into_inner();
        self.store
            .append(req.list_id, req.value)
            .await
            .map_err(status_from_store_error)?;
        Ok(tonic::Response::new(AppendResponse { ok: true }))
    }

    async fn remove(
        &self,
        request: tonic::Request<RemoveRequest>,
    ) -> Result<tonic::Response<RemoveResponse>, tonic::Status> {
        let req = request.into_inner();
        let value = self
            .store
            .remove(req.list_id)
            .await
            .map_err(status_from_store_error)?;
        Ok(tonic::Response::new(RemoveResponse { value }))
    }

    async fn size(
        &self,
        request: tonic::Request<SizeRequest>,
    ) -> Result<tonic::Response<SizeResponse>, tonic::Status> {
        let req = request.into_inner();
        let size = self.store.size(req.list_id).await as u64;
        Ok(tonic::Response::new(SizeResponse { size }))
    }

    async fn get(
        &self,
        request: tonic::Request<GetRequest>,
    ) -> Result<tonic::Response<GetResponse>, tonic::Status> {
        let req = request.into_inner();
        let value = self
            .store
            .get(req.list_id, req.index)
            .await
            .map_err(status_from_store_error)?;
        Ok(tonic::Response::new(GetResponse { value }))
    }
}
