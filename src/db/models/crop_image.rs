//! Crop image records and the farmer directory view.

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// Metadata record of an uploaded crop photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CropImage {
    pub id: String,
    #[serde(default)]
    pub farmer_id: String,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: String,
}

impl CropImage {
    /// Coordinates with six decimals, as shown next to the photo.
    pub fn coordinates(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }

    /// Upload date (YYYY-MM-DD); falls back to the raw timestamp.
    pub fn uploaded_on(&self) -> String {
        chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| self.created_at.clone())
    }
}

/// Fields written when a crop photo is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCropImage {
    pub farmer_id: String,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A farmer profile with its crop photos, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProfile {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub crop_images: Vec<CropImage>,
}

impl FarmerProfile {
    pub fn phone_display(&self) -> &str {
        self.phone.as_deref().unwrap_or("")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
