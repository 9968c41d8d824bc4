//! Choosing the image a VM boots from.
//!
//! An image given as a UUID is booted as is. Anything else is a label: the
//! project's own images with that name are searched before the public
//! catalogue, and the newest usable candidate for the guest architecture
//! wins.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};
use tracing::debug;
use uuid::Uuid;

use crate::backend::InstanceRequest;

use super::super::{ScalewayBackend, ScalewayBackendError};

const USABLE_STATE: &str = "available";

/// Image listing searched for a label, in lookup order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(in crate::scaleway) enum Catalogue {
    Project,
    Public,
}

impl Catalogue {
    const LOOKUP_ORDER: [Self; 2] = [Self::Project, Self::Public];
}

/// Normalised identifier when `image` is a UUID rather than a label.
pub(in crate::scaleway) fn image_id_literal(image: &str) -> Option<String> {
    Uuid::parse_str(image.trim()).ok().map(|id| id.to_string())
}

/// Newest image built for the requested architecture that can be booted.
pub(in crate::scaleway) fn newest_usable(
    images: Vec<ScalewayImage>,
    request: &InstanceRequest,
) -> Option<ScalewayImage> {
    images
        .into_iter()
        .filter(|image| image.arch == request.architecture && image.state == USABLE_STATE)
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
}

/// Resolves a label by asking `list` for each catalogue in turn. The project
/// catalogue is skipped when the request carries no project.
///
/// # Errors
///
/// Returns the first listing error, or [`ScalewayBackendError::ImageNotFound`]
/// when no catalogue holds a usable match.
pub(in crate::scaleway) async fn resolve_label<List, Fut>(
    request: &InstanceRequest,
    mut list: List,
) -> Result<String, ScalewayBackendError>
where
    List: FnMut(Catalogue) -> Fut,
    Fut: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
{
    for catalogue in Catalogue::LOOKUP_ORDER {
        if catalogue == Catalogue::Project && request.project_id.trim().is_empty() {
            continue;
        }
        if let Some(image) = newest_usable(list(catalogue).await?, request) {
            debug!(label = %request.image, image = %image.id, ?catalogue, "resolved image label");
            return Ok(image.id);
        }
    }
    Err(ScalewayBackendError::ImageNotFound {
        label: request.image.clone(),
        arch: request.architecture.clone(),
        zone: request.zone.clone(),
    })
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn image_for(
        &self,
        request: &InstanceRequest,
    ) -> Result<String, ScalewayBackendError> {
        match image_id_literal(&request.image) {
            Some(id) => Ok(id),
            None => resolve_label(request, |catalogue| self.list_images(request, catalogue)).await,
        }
    }

    async fn list_images(
        &self,
        request: &InstanceRequest,
        catalogue: Catalogue,
    ) -> Result<Vec<ScalewayImage>, ScalewayBackendError> {
        let query = ScalewayListInstanceImagesBuilder::new(self.api.clone(), &request.zone)
            .name(&request.image)
            .arch(&request.architecture);
        let query = match (catalogue, request.organisation_id.as_deref()) {
            (Catalogue::Public, _) => query.public(true),
            (Catalogue::Project, None) => query.project(&request.project_id),
            (Catalogue::Project, Some(organisation)) => query
                .project(&request.project_id)
                .organization(organisation),
        };
        query.run_async().await.map_err(ScalewayBackendError::from)
    }
}
