use std::net::SocketAddr;

use tonic::transport::{Channel, Endpoint};

use crate::rpc::proto::remotelist::{
    AppendRequest, GetRequest, RemoveRequest, SizeRequest, list_service_client::ListServiceClient,
};

#[derive(Debug)]
pub enum ClientError {
    Transport(tonic::transport::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "remotelist transport error: {err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
        }
    }
}

impl From<tonic::transport::Error> for ClientError {
    fn from(value: tonic::transport::Error) -> Self {
        Self::Transport(value)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteListClient {
    inner: ListServiceClient<Channel>,
}

pub async fn connect(addr: SocketAddr) -> Result<RemoteListClient, ClientError> {
    let endpoint = Endpoint::from_shared(format!("http://{addr}"))?;
    let channel = endpoint.connect().await?;
    Ok(RemoteListClient {
        inner: ListServiceClient::new(channel),
    })
}

impl RemoteListClient {
    pub async fn append(&mut self, list_id: i64, value: i64) -> Result<bool, tonic::Status> {
        let resp = self.inner.append(AppendRequest { list_id, value }).await?;
        Ok(resp.into_inner().ok)
    }

    pub async fn remove(&mut self, list_id: i64) -> Result<i64, tonic::Status> {
        let resp = self.inner.remove(RemoveRequest { list_id }).await?;
        Ok(resp.into_inner().value)
    }

    pub async fn size(&mut self, list_id: i64) -> Result<u64, tonic::Status> {
        let resp = self.inner.size(SizeRequest { list_id }).await?;
        Ok(resp.into_inner().size)
    }

    pub async fn get(&mut self, list_id: i64, index: i64) -> Result<i64, tonic::Status> {
        let resp = self.inner.get(GetRequest { list_id, index }).await?;
        Ok(resp.into_inner().value)
    }
}
