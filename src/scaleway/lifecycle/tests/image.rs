//! Tests for choosing the boot image.

use std::cell::RefCell;

use rstest::rstest;
use scaleway_rs::ScalewayImage;

use super::{ImageSpec, base_request, image};
use crate::scaleway::ScalewayBackendError;
use crate::scaleway::lifecycle::image::{Catalogue, image_id_literal, newest_usable, resolve_label};

fn x86(id: &'static str, creation_date: &'static str) -> ScalewayImage {
    image(ImageSpec {
        id,
        arch: "x86_64",
        state: "available",
        creation_date,
    })
}

#[rstest]
#[case::canonical("9c41e95b-add2-4ef8-b1b1-af8899748eda")]
#[case::uppercase("9C41E95B-ADD2-4EF8-B1B1-AF8899748EDA")]
#[case::padded(" 9c41e95b-add2-4ef8-b1b1-af8899748eda ")]
fn uuids_are_booted_directly(#[case] image: &str) {
    assert_eq!(
        image_id_literal(image).as_deref(),
        Some("9c41e95b-add2-4ef8-b1b1-af8899748eda")
    );
}

#[rstest]
#[case::label("Ubuntu 24.04 Noble Numbat")]
#[case::slug("ubuntu_noble")]
fn labels_are_not_identifiers(#[case] image: &str) {
    assert!(image_id_literal(image).is_none());
}

#[tokio::test]
async fn image_for_boots_identifier_without_listing() {
    let mut request = base_request();
    request.image = String::from("9c41e95b-add2-4ef8-b1b1-af8899748eda");

    let id = super::backend_fixture()
        .image_for(&request)
        .await
        .expect("identifier should pass through");

    assert_eq!(id, "9c41e95b-add2-4ef8-b1b1-af8899748eda");
}

#[test]
fn newest_usable_skips_other_arches_and_unfinished_images() {
    let images = vec![
        image(ImageSpec {
            id: "arm",
            arch: "arm64",
            state: "available",
            creation_date: "2025-03-01T00:00:00Z",
        }),
        image(ImageSpec {
            id: "building",
            arch: "x86_64",
            state: "creating",
            creation_date: "2025-03-01T00:00:00Z",
        }),
        x86("older", "2025-01-01T00:00:00Z"),
        x86("newer", "2025-02-01T00:00:00Z"),
    ];

    let chosen = newest_usable(images, &base_request()).map(|image| image.id);

    assert_eq!(chosen.as_deref(), Some("newer"));
}

#[tokio::test]
async fn project_images_win_over_public_ones() {
    let asked = RefCell::new(Vec::new());

    let id = resolve_label(&base_request(), |catalogue| {
        asked.borrow_mut().push(catalogue);
        let found = match catalogue {
            Catalogue::Project => x86("project-img", "2025-01-01T00:00:00Z"),
            Catalogue::Public => x86("public-img", "2025-06-01T00:00:00Z"),
        };
        async move { Ok(vec![found]) }
    })
    .await
    .expect("label should resolve");

    assert_eq!(id, "project-img");
    assert_eq!(*asked.borrow(), [Catalogue::Project]);
}

#[tokio::test]
async fn unusable_project_images_fall_back_to_public() {
    let id = resolve_label(&base_request(), |catalogue| async move {
        Ok(match catalogue {
            Catalogue::Project => vec![image(ImageSpec {
                id: "wrong-arch",
                arch: "arm64",
                state: "available",
                creation_date: "2025-01-01T00:00:00Z",
            })],
            Catalogue::Public => vec![x86("public-img", "2025-01-01T00:00:00Z")],
        })
    })
    .await
    .expect("public fallback should resolve");

    assert_eq!(id, "public-img");
}

#[tokio::test]
async fn requests_without_project_only_search_public_images() {
    let mut request = base_request();
    request.project_id = String::new();
    let asked = RefCell::new(Vec::new());

    let result = resolve_label(&request, |catalogue| {
        asked.borrow_mut().push(catalogue);
        async { Ok(Vec::new()) }
    })
    .await;

    assert!(matches!(
        result,
        Err(ScalewayBackendError::ImageNotFound { ref label, ref arch, .. })
            if label == "label" && arch == "x86_64"
    ));
    assert_eq!(*asked.borrow(), [Catalogue::Public]);
}

#[tokio::test]
async fn listing_errors_stop_resolution() {
    let err = resolve_label(&base_request(), |_| async {
        Err(ScalewayBackendError::Provider {
            code: String::from("internal"),
            message: String::from("boom"),
        })
    })
    .await
    .expect_err("error should surface");

    assert!(matches!(err, ScalewayBackendError::Provider { message, .. } if message == "boom"));
}
