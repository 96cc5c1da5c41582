//! Data model definitions for vending machines and the records stored next to them.
//!
//! [`VendingMachine`] is the entity every screen works with. It is serialized in
//! camelCase so the JSON written to the cache is the same document the mobile
//! front-end reads and writes. [`MachineDraft`] is what a form hands over before
//! the backend assigns an id and the review aggregates.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Image used when a draft is submitted without a photo.
pub const DEFAULT_IMAGE_URL: &str =
    "https://images.pexels.com/photos/1855214/pexels-photo-1855214.jpeg";

/// Sentinel accepted by the category filter meaning "no filtering".
pub const ALL_CATEGORIES: &str = "all";

/// The closed set of product categories a machine can be tagged with.
///
/// Serialized as the display label (`"Produits locaux"`, not `"ProduitsLocaux"`)
/// because that is what the backend stores in its `category` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Pain")]
    Pain,
    #[serde(rename = "Pizza")]
    Pizza,
    #[serde(rename = "Fleurs")]
    Fleurs,
    #[serde(rename = "Lait")]
    Lait,
    #[serde(rename = "Oeufs")]
    Oeufs,
    #[serde(rename = "Produits locaux")]
    ProduitsLocaux,
    #[serde(rename = "Autre")]
    Autre,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Pain,
        Category::Pizza,
        Category::Fleurs,
        Category::Lait,
        Category::Oeufs,
        Category::ProduitsLocaux,
        Category::Autre,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Pain => "Pain",
            Category::Pizza => "Pizza",
            Category::Fleurs => "Fleurs",
            Category::Lait => "Lait",
            Category::Oeufs => "Oeufs",
            Category::ProduitsLocaux => "Produits locaux",
            Category::Autre => "Autre",
        }
    }

    /// Case-insensitive comparison against a free-form label.
    pub fn matches_label(&self, label: &str) -> bool {
        self.label().to_lowercase() == label.trim().to_lowercase()
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.matches_label(s))
            .ok_or_else(|| format!("Unknown category: {s}"))
    }
}

/// One physical vending point.
///
/// `rating` and `review_count` are aggregates computed by the backend from
/// reviews; this crate never edits them, and a freshly created machine always
/// starts at zero for both.
///
/// # Examples
///
/// ```rust
/// use vending_finder_core::machine_model::{Category, VendingMachine};
///
/// let json = r#"{
///     "id": "1",
///     "name": "Distributeur de pain",
///     "address": "123 Rue de Paris, 75001 Paris",
///     "description": "",
///     "category": "Pain",
///     "averagePrice": 2.5,
///     "imageUrl": "https://example.com/pain.jpg",
///     "latitude": 48.856614,
///     "longitude": 2.352222,
///     "rating": 4.5,
///     "reviewCount": 32
/// }"#;
///
/// let machine: VendingMachine = serde_json::from_str(json)?;
/// assert_eq!(machine.category, Category::Pain);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendingMachine {
    /// Opaque identifier, unique across all machines.
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub average_price: f64,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Average review score, 0 to 5.
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u32,
}

impl VendingMachine {
    /// Builds a machine from a draft with the given id and zeroed review aggregates.
    pub fn from_draft(id: String, draft: MachineDraft) -> Self {
        Self {
            id,
            name: draft.name,
            address: draft.address,
            description: draft.description,
            category: draft.category,
            average_price: draft.average_price,
            image_url: draft
                .image_url
                .unwrap_or_else(|| DEFAULT_IMAGE_URL.to_string()),
            latitude: draft.latitude,
            longitude: draft.longitude,
            rating: 0.0,
            review_count: 0,
        }
    }

    /// True when `query` appears in the name or the address, ignoring case.
    /// An empty query matches everything.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&query) || self.address.to_lowercase().contains(&query)
    }
}

/// A machine as submitted by the add form, before the backend fills in the
/// id and review aggregates.
///
/// Field validation (non-empty name, address present, a location picked) is the
/// form's job; everything here is assumed structurally valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDraft {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub average_price: f64,
    /// Photo picked on the device; [`DEFAULT_IMAGE_URL`] is used when absent.
    #[serde(default, alias = "imageUri")]
    pub image_url: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Last position the device reported, cached for the map screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// The signed-in account as handed over by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// The six machines the in-memory backend is seeded with.
pub fn sample_machines() -> Vec<VendingMachine> {
    #[allow(clippy::too_many_arguments)]
    fn machine(
        id: &str,
        name: &str,
        address: &str,
        description: &str,
        category: Category,
        average_price: f64,
        photo: &str,
        (latitude, longitude): (f64, f64),
        (rating, review_count): (f64, u32),
    ) -> VendingMachine {
        VendingMachine {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            description: description.to_string(),
            category,
            average_price,
            image_url: format!("https://images.pexels.com/photos/{photo}/pexels-photo-{photo}.jpeg"),
            latitude,
            longitude,
            rating,
            review_count,
        }
    }

    vec![
        machine(
            "1",
            "Distributeur de pain Boulangerie Martin",
            "123 Rue de Paris, 75001 Paris",
            "Distributeur de baguettes traditionnelles et pains spéciaux. Approvisionné tous les jours par la Boulangerie Martin.",
            Category::Pain,
            2.5,
            "1855214",
            (48.856614, 2.352222),
            (4.5, 32),
        ),
        machine(
            "2",
            "Pizz'Automat",
            "45 Avenue Victor Hugo, 69002 Lyon",
            "Pizzas artisanales cuites sur place. 6 variétés disponibles. Paiement par carte bancaire uniquement.",
            Category::Pizza,
            12.0,
            "3915857",
            (45.751688, 4.835797),
            (4.2, 18),
        ),
        machine(
            "3",
            "La Ferme Locale - Distributeur de lait",
            "78 Route des Vignes, 33000 Bordeaux",
            "Lait frais non pasteurisé directement de notre ferme. Apportez votre bouteille ou achetez-en une sur place.",
            Category::Lait,
            1.8,
            "2506560",
            (44.837789, -0.579180),
            (4.8, 45),
        ),
        machine(
            "4",
            "Fleurs 24/7",
            "15 Place du Marché, 31000 Toulouse",
            "Bouquets de fleurs fraîches. Idéal pour un cadeau de dernière minute. Compositions florales renouvelées deux fois par semaine.",
            Category::Fleurs,
            15.0,
            "2111192",
            (43.604462, 1.444247),
            (4.0, 12),
        ),
        machine(
            "5",
            "Oeufs de la Ferme Durand",
            "256 Chemin Rural, 59000 Lille",
            "Oeufs bio de poules élevées en plein air. Approvisionnement quotidien.",
            Category::Oeufs,
            4.5,
            "6045020",
            (50.629250, 3.057256),
            (4.7, 28),
        ),
        machine(
            "6",
            "Le Panier Local",
            "42 Rue du Commerce, 44000 Nantes",
            "Produits frais locaux: légumes, fruits, miel, confitures. Les produits varient selon la saison.",
            Category::ProduitsLocaux,
            8.0,
            "264537",
            (47.218371, -1.553621),
            (4.6, 37),
        ),
    ]
}
