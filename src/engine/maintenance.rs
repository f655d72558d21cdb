use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_DESCRIPTION_LEN;
use crate::model::*;

use super::conflict::validate_text;
use super::{Engine, EngineError};

impl Engine {
    /// File a maintenance request against an existing room.
    pub async fn submit_maintenance(
        &self,
        room_id: Ulid,
        user_id: Ulid,
        description: &str,
        image: Option<String>,
    ) -> Result<MaintenanceRequest, EngineError> {
        let description = validate_text(description, "description", MAX_DESCRIPTION_LEN)?;
        if !self.store.contains_room(&room_id) {
            return Err(EngineError::NotFound("room", room_id));
        }
        let request = MaintenanceRequest {
            id: Ulid::new(),
            room_id,
            user_id,
            description,
            image: image.filter(|i| !i.trim().is_empty()),
            status: MaintenanceStatus::Pending,
            created_at: self.clock.now(),
        };
        let mut list = self.store.maintenance().write().await;
        self.persist_maintenance(
            &mut list,
            &Event::MaintenanceSubmitted {
                request: request.clone(),
            },
        )
        .await?;
        info!(request_id = %request.id, %room_id, "maintenance request submitted");
        Ok(request)
    }

    pub async fn my_maintenance(&self, user_id: Ulid) -> Vec<MaintenanceRequest> {
        self.store
            .maintenance()
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn all_maintenance(&self) -> Vec<MaintenanceRequest> {
        self.store.maintenance().read().await.clone()
    }

    /// Move a request along pending → in-progress → resolved. Room status
    /// is not touched.
    pub async fn set_maintenance_status(
        &self,
        id: Ulid,
        status: MaintenanceStatus,
    ) -> Result<MaintenanceRequest, EngineError> {
        // Check and write under one guard so concurrent updates serialize.
        let mut list = self.store.maintenance().write().await;
        let current = list
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound("maintenance request", id))?;

        match current.status.transition(status) {
            Transition::Unchanged => return Ok(current),
            Transition::Denied => {
                return Err(EngineError::InvalidTransition {
                    from: current.status.to_string(),
                    to: status.to_string(),
                });
            }
            Transition::Allowed => {}
        }

        self.persist_maintenance(&mut list, &Event::MaintenanceStatusChanged { id, status })
            .await?;
        drop(list);
        info!(request_id = %id, from = %current.status, to = %status, "maintenance status changed");
        Ok(MaintenanceRequest { status, ..current })
    }
}
