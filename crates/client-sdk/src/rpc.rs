use bytes::Bytes;
use common::{
    AllocateChunksRequest, AllocateChunksResponse, GetFileInfoRequest, GetFileInfoResponse,
    HealthStatus, ListFilesRequest, ListFilesResponse, METADATA_SERVICE, RpcErrorBody,
    STORAGE_SERVICE, StoreChunkResponse,
};
use reqwest::{Client, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{CallContext, DfsError};

/// Accepts `host:port` as well as full URLs; a missing scheme means `http`.
pub fn normalize_base_url(address: &str) -> Result<Url, DfsError> {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(DfsError::InvalidArgument("empty service address".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|err| DfsError::InvalidArgument(format!("invalid address {address}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(DfsError::InvalidArgument(format!(
            "address cannot be used as a base url: {address}"
        )));
    }
    Ok(url)
}

fn method_url(base: &Url, segments: &[&str]) -> Result<Url, DfsError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| DfsError::InvalidArgument(format!("not a base url: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn error_from_response(response: Response) -> DfsError {
    let status = response.status().as_u16();
    let body = response.json::<RpcErrorBody>().await.ok();
    DfsError::from_rpc(status, body)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, DfsError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    Ok(response.json::<T>().await?)
}

#[derive(Clone, Debug)]
pub struct MetadataClient {
    http: Client,
    base_url: Url,
}

impl MetadataClient {
    pub fn new(http: Client, address: &str) -> Result<Self, DfsError> {
        Ok(Self {
            http,
            base_url: normalize_base_url(address)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn allocate_chunks(
        &self,
        ctx: &CallContext,
        file_name: &str,
        file_size: u64,
    ) -> Result<AllocateChunksResponse, DfsError> {
        self.call(
            ctx,
            "AllocateChunks",
            &AllocateChunksRequest {
                file_name: file_name.to_string(),
                file_size,
            },
        )
        .await
    }

    pub async fn get_file_info(
        &self,
        ctx: &CallContext,
        file_name: &str,
    ) -> Result<GetFileInfoResponse, DfsError> {
        self.call(
            ctx,
            "GetFileInfo",
            &GetFileInfoRequest {
                file_name: file_name.to_string(),
            },
        )
        .await
    }

    pub async fn list_files(&self, ctx: &CallContext) -> Result<ListFilesResponse, DfsError> {
        self.call(ctx, "ListFiles", &ListFilesRequest::default())
            .await
    }

    async fn call<Req, Resp>(&self, ctx: &CallContext, method: &str, request: &Req) -> Result<Resp, DfsError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = method_url(&self.base_url, &[METADATA_SERVICE, method])?;
        ctx.run(async {
            let response = self.http.post(url).json(request).send().await?;
            decode::<Resp>(response).await
        })
        .await
    }
}

/// Handle to one storage node. Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone, Debug)]
pub struct StorageClient {
    http: Client,
    base_url: Url,
    address: String,
}

impl StorageClient {
    /// Confirms the node answers its health check before handing out a handle.
    pub async fn dial(http: Client, address: &str) -> Result<Self, DfsError> {
        let base_url = normalize_base_url(address)?;
        let health_url = method_url(&base_url, &["health"])?;

        let health = decode::<HealthStatus>(http.get(health_url).send().await?).await?;
        if !health.online {
            return Err(DfsError::Internal(format!("storage node {address} reports offline")));
        }

        Ok(Self {
            http,
            base_url,
            address: address.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn store_chunk(
        &self,
        ctx: &CallContext,
        chunk_id: &str,
        data: Bytes,
    ) -> Result<StoreChunkResponse, DfsError> {
        let url = method_url(&self.base_url, &[STORAGE_SERVICE, "StoreChunk", chunk_id])?;
        let stored = ctx
            .run(async {
                let response = self.http.put(url).body(data).send().await?;
                decode::<StoreChunkResponse>(response).await
            })
            .await?;

        if !stored.success {
            return Err(DfsError::Internal(format!(
                "storage node {} did not store chunk {chunk_id}",
                self.address
            )));
        }
        Ok(stored)
    }

    pub async fn retrieve_chunk(&self, ctx: &CallContext, chunk_id: &str) -> Result<Bytes, DfsError> {
        let url = method_url(&self.base_url, &[STORAGE_SERVICE, "RetrieveChunk", chunk_id])?;
        ctx.run(async {
            let response = self.http.get(url).send().await?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            Ok(response.bytes().await?)
        })
        .await
    }
}
