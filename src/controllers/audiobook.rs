use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::audiobook::{
        AudiobookServiceApi, JobListResponse, JobSnapshot, SubmitJobRequest, SubmitJobResponse,
        UpdateDurationRequest,
    },
    error::AppResult,
};

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub struct AudiobookController {
    audiobook_service: Arc<dyn AudiobookServiceApi>,
}

impl AudiobookController {
    pub fn new(audiobook_service: Arc<dyn AudiobookServiceApi>) -> Self {
        Self { audiobook_service }
    }

    /// POST /api/audiobooks - Submit a document for conversion
    pub async fn submit(
        State(controller): State<Arc<AudiobookController>>,
        Json(request): Json<SubmitJobRequest>,
    ) -> AppResult<(StatusCode, Json<SubmitJobResponse>)> {
        let id = controller.audiobook_service.submit(request).await?;
        Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { id })))
    }

    /// GET /api/audiobooks/{id} - Job status
    pub async fn get_status(
        State(controller): State<Arc<AudiobookController>>,
        Path(job_id): Path<Uuid>,
    ) -> AppResult<Json<JobSnapshot>> {
        let snapshot = controller.audiobook_service.get_status(job_id).await?;
        Ok(Json(snapshot))
    }

    /// GET /api/audiobooks?page=&limit= - Jobs, newest first
    pub async fn list(
        State(controller): State<Arc<AudiobookController>>,
        Query(query): Query<ListJobsQuery>,
    ) -> AppResult<Json<JobListResponse>> {
        let page = controller
            .audiobook_service
            .list(query.page, query.limit)
            .await?;
        Ok(Json(page))
    }

    /// DELETE /api/audiobooks/{id} - Remove a finished job and its audio
    pub async fn delete(
        State(controller): State<Arc<AudiobookController>>,
        Path(job_id): Path<Uuid>,
    ) -> AppResult<StatusCode> {
        controller.audiobook_service.delete(job_id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    /// GET /api/audiobooks/{id}/events - Progress as server-sent events
    pub async fn events(
        State(controller): State<Arc<AudiobookController>>,
        Path(job_id): Path<Uuid>,
    ) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
        let snapshots = controller.audiobook_service.subscribe(job_id).await?;

        let stream = async_stream::stream! {
            let mut snapshots = snapshots;
            while let Some(snapshot) = snapshots.next().await {
                let finished = snapshot.status.is_terminal();
                let data = serde_json::to_string(&snapshot).unwrap_or_default();
                yield Ok(Event::default().event("progress").data(data));
                if finished {
                    yield Ok(Event::default().event("done").data(data_for_done(&snapshot)));
                    break;
                }
            }
        };

        Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
    }

    /// POST /api/audiobooks/{id}/cancel - Stop a pending or running job
    pub async fn cancel(
        State(controller): State<Arc<AudiobookController>>,
        Path(job_id): Path<Uuid>,
    ) -> AppResult<StatusCode> {
        controller.audiobook_service.cancel(job_id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    /// POST /api/audiobooks/{id}/duration - Correct the stored duration
    pub async fn update_duration(
        State(controller): State<Arc<AudiobookController>>,
        Path(job_id): Path<Uuid>,
        Json(request): Json<UpdateDurationRequest>,
    ) -> AppResult<Json<UpdateDurationRequest>> {
        let duration_seconds = controller
            .audiobook_service
            .reconcile_duration(job_id, request.duration_seconds)
            .await?;
        Ok(Json(UpdateDurationRequest { duration_seconds }))
    }
}

fn data_for_done(snapshot: &JobSnapshot) -> String {
    json!({ "id": snapshot.id, "status": snapshot.status }).to_string()
}
