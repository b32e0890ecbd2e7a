//! Farmer-facing recent uploads and the admin farmer directory.

use serde::Serialize;
use tracing::error;

use crate::backend::{Backend, BackendError};
use crate::db::{CropImage, FarmerProfile, Session};

pub const NO_FARMERS_MESSAGE: &str = "No farmers found matching your search criteria";

/// The caller's own records, newest first, at most `limit`.
pub async fn recent_uploads(
    backend: &dyn Backend,
    session: &Session,
    limit: u32,
) -> Result<Vec<CropImage>, BackendError> {
    backend
        .recent_crop_images(session, &session.user.id, limit)
        .await
        .inspect_err(|e| error!(user_id = %session.user.id, error = %e, "Failed to load recent uploads"))
}

/// Result of a directory search.
#[derive(Debug, Clone, Serialize)]
pub struct FarmerDirectory {
    pub query: String,
    pub total: usize,
    pub farmers: Vec<FarmerProfile>,
}

impl FarmerDirectory {
    /// Nothing matched; distinct from a failed load.
    pub fn is_empty(&self) -> bool {
        self.farmers.is_empty()
    }

    pub fn empty_message(&self) -> Option<&'static str> {
        self.is_empty().then_some(NO_FARMERS_MESSAGE)
    }
}

/// Keep farmers whose name contains `query` (case-insensitive) or whose
/// phone contains it. An empty query keeps everyone.
pub fn filter_farmers(farmers: Vec<FarmerProfile>, query: &str) -> Vec<FarmerProfile> {
    let query = query.trim();
    if query.is_empty() {
        return farmers;
    }
    let needle = query.to_lowercase();

    farmers
        .into_iter()
        .filter(|farmer| {
            farmer.full_name.to_lowercase().contains(&needle)
                || farmer
                    .phone
                    .as_deref()
                    .is_some_and(|phone| phone.contains(query))
        })
        .collect()
}

/// Load every profile with its images, then apply the search.
pub async fn farmer_directory(
    backend: &dyn Backend,
    session: &Session,
    query: Option<&str>,
) -> Result<FarmerDirectory, BackendError> {
    let farmers = backend
        .farmers_with_images(session)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to load farmer directory"))?;

    let total = farmers.len();
    let query = query.unwrap_or_default().trim().to_string();
    let farmers = filter_farmers(farmers, &query);

    Ok(FarmerDirectory {
        query,
        total,
        farmers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{account, backend, Faulty};
    use crate::db::NewCropImage;

    fn farmer(name: &str, phone: Option<&str>) -> FarmerProfile {
        FarmerProfile {
            id: name.to_lowercase(),
            full_name: name.to_string(),
            phone: phone.map(str::to_string),
            crop_images: Vec::new(),
        }
    }

    fn names(farmers: &[FarmerProfile]) -> Vec<&str> {
        farmers.iter().map(|f| f.full_name.as_str()).collect()
    }

    fn directory() -> Vec<FarmerProfile> {
        vec![
            farmer("Amina Odhiambo", Some("0711000111")),
            farmer("Brian Kiprop", Some("+254 722 333 444")),
            farmer("Wanjiru Kamau", None),
        ]
    }

    #[test]
    fn test_filter_by_name_is_case_insensitive() {
        assert_eq!(names(&filter_farmers(directory(), "WANJIRU")), vec!["Wanjiru Kamau"]);
        assert_eq!(
            names(&filter_farmers(directory(), "ki")),
            vec!["Brian Kiprop"]
        );
    }

    #[test]
    fn test_filter_by_phone_substring() {
        assert_eq!(names(&filter_farmers(directory(), "722 333")), vec!["Brian Kiprop"]);
        assert_eq!(names(&filter_farmers(directory(), "0711")), vec!["Amina Odhiambo"]);
    }

    #[test]
    fn test_empty_query_keeps_everyone() {
        assert_eq!(filter_farmers(directory(), "").len(), 3);
        assert_eq!(filter_farmers(directory(), "   ").len(), 3);
    }

    #[test]
    fn test_query_is_trimmed() {
        assert_eq!(names(&filter_farmers(directory(), "  amina ")), vec!["Amina Odhiambo"]);
    }

    #[test]
    fn test_no_match_is_explicitly_empty() {
        let farmers = filter_farmers(directory(), "zzz");
        assert!(farmers.is_empty());

        let dir = FarmerDirectory {
            query: "zzz".to_string(),
            total: 3,
            farmers,
        };
        assert_eq!(dir.empty_message(), Some(NO_FARMERS_MESSAGE));
    }

    #[tokio::test]
    async fn test_recent_uploads_are_scoped_to_caller() {
        let (backend, _dir) = backend().await;
        backend.sign_up(&account("a@farm.test", "A", "0711000111")).await.unwrap();
        backend.sign_up(&account("b@farm.test", "B", "0722000222")).await.unwrap();
        let a = backend.sign_in("a@farm.test", "secret-pass").await.unwrap();
        let b = backend.sign_in("b@farm.test", "secret-pass").await.unwrap();

        for (session, lat) in [(&a, 1.0), (&b, 2.0), (&a, 3.0)] {
            backend
                .insert_crop_image(
                    session,
                    &NewCropImage {
                        farmer_id: session.user.id.clone(),
                        image_url: "http://localhost:8080/storage/crop_images/x.jpg".to_string(),
                        latitude: lat,
                        longitude: 36.0,
                    },
                )
                .await
                .unwrap();
        }

        let mine = recent_uploads(&backend, &a, 5).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.farmer_id == a.user.id));
        assert_eq!(mine[0].latitude, 3.0);
    }

    #[tokio::test]
    async fn test_directory_searches_loaded_profiles() {
        let (backend, _dir) = backend().await;
        backend
            .sign_up(&account("amina@farm.test", "Amina Odhiambo", "0711000111"))
            .await
            .unwrap();
        backend
            .ensure_admin_user("admin@farm.test", "admin-pass")
            .await
            .unwrap();
        let admin = backend.sign_in("admin@farm.test", "admin-pass").await.unwrap();

        let dir = farmer_directory(&backend, &admin, Some(" amina ")).await.unwrap();
        assert_eq!(dir.query, "amina");
        assert_eq!(names(&dir.farmers), vec!["Amina Odhiambo"]);
        assert!(dir.total >= 2);

        let dir = farmer_directory(&backend, &admin, Some("nobody")).await.unwrap();
        assert!(dir.is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_error_not_empty() {
        let (backend, _dir) = backend().await;
        backend
            .ensure_admin_user("admin@farm.test", "admin-pass")
            .await
            .unwrap();
        let admin = backend.sign_in("admin@farm.test", "admin-pass").await.unwrap();
        let mut faulty = Faulty::new(backend);
        faulty.fail_listing = true;

        assert!(farmer_directory(&faulty, &admin, None).await.is_err());
        assert!(recent_uploads(&faulty, &admin, 5).await.is_err());
    }
}
