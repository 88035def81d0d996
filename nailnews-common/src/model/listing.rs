use crate::model::pricing::Cents;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    SellSalon,
    HireTech,
    Service,
    NailSalon,
    NailSupply,
    RenewLicense,
    PhotoVideo,
    BeautySchool,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::SellSalon,
        Category::HireTech,
        Category::Service,
        Category::NailSalon,
        Category::NailSupply,
        Category::RenewLicense,
        Category::PhotoVideo,
        Category::BeautySchool,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::SellSalon => "sell-salon",
            Category::HireTech => "hire-tech",
            Category::Service => "service",
            Category::NailSalon => "nail-salon",
            Category::NailSupply => "nail-supply",
            Category::RenewLicense => "renew-license",
            Category::PhotoVideo => "photo-video",
            Category::BeautySchool => "beauty-school",
        }
    }

    /// Businesses shown in the directory rather than as classified ads.
    #[must_use]
    pub fn is_directory(self) -> bool {
        matches!(
            self,
            Category::NailSalon | Category::NailSupply | Category::BeautySchool
        )
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown category: {0}")]
pub struct UnknownCategoryError(String);

impl FromStr for Category {
    type Err = UnknownCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownCategoryError(s.to_owned()))
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct BusinessContact {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// Category plus the fields that only make sense for that category.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "kebab-case")]
pub enum Listing {
    SellSalon {
        area_sqft: u32,
        chairs: u16,
        #[serde(default)]
        tables: Option<u16>,
        #[serde(default)]
        monthly_rent: Option<Cents>,
        #[serde(default)]
        asking_price: Option<Cents>,
    },
    HireTech {
        position: String,
        #[serde(default)]
        pay: Option<String>,
    },
    Service {
        #[serde(default)]
        service_type: Option<String>,
    },
    NailSalon(BusinessContact),
    NailSupply(BusinessContact),
    RenewLicense {
        #[serde(default)]
        license_state: Option<String>,
    },
    PhotoVideo {},
    BeautySchool(BusinessContact),
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidListingError {
    #[error("A salon for sale needs a positive floor area")]
    MissingArea,
    #[error("A salon for sale needs at least one chair")]
    MissingChairs,
    #[error("A job offer needs a position")]
    MissingPosition,
    #[error("Prices cannot be negative")]
    NegativePrice,
}

impl Listing {
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Listing::SellSalon { .. } => Category::SellSalon,
            Listing::HireTech { .. } => Category::HireTech,
            Listing::Service { .. } => Category::Service,
            Listing::NailSalon(_) => Category::NailSalon,
            Listing::NailSupply(_) => Category::NailSupply,
            Listing::RenewLicense { .. } => Category::RenewLicense,
            Listing::PhotoVideo {} => Category::PhotoVideo,
            Listing::BeautySchool(_) => Category::BeautySchool,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidListingError> {
        match self {
            Listing::SellSalon {
                area_sqft,
                chairs,
                monthly_rent,
                asking_price,
                ..
            } => {
                if *area_sqft == 0 {
                    return Err(InvalidListingError::MissingArea);
                }
                if *chairs == 0 {
                    return Err(InvalidListingError::MissingChairs);
                }
                if [monthly_rent, asking_price]
                    .into_iter()
                    .flatten()
                    .any(|price| price.0 < 0)
                {
                    return Err(InvalidListingError::NegativePrice);
                }
                Ok(())
            }
            Listing::HireTech { position, .. } if position.trim().is_empty() => {
                Err(InvalidListingError::MissingPosition)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, InvalidListingError, Listing};

    #[test]
    fn listing_json_is_tagged_by_category() {
        let listing: Listing = serde_json::from_str(
            r#"{"category":"sell-salon","area_sqft":1200,"chairs":6,"monthly_rent":450000}"#,
        )
        .unwrap();

        assert_eq!(listing.category(), Category::SellSalon);
        assert_eq!(listing.validate(), Ok(()));

        let album: Listing = serde_json::from_str(r#"{"category":"photo-video"}"#).unwrap();
        assert_eq!(album.category(), Category::PhotoVideo);

        let salon: Listing =
            serde_json::from_str(r#"{"category":"nail-salon","phone":"7135550101"}"#).unwrap();
        assert_eq!(salon.category(), Category::NailSalon);
    }

    #[test]
    fn sell_salon_requires_its_fields() {
        assert!(
            serde_json::from_str::<Listing>(r#"{"category":"sell-salon","chairs":2}"#).is_err()
        );

        let no_chairs = Listing::SellSalon {
            area_sqft: 800,
            chairs: 0,
            tables: None,
            monthly_rent: None,
            asking_price: None,
        };
        assert_eq!(no_chairs.validate(), Err(InvalidListingError::MissingChairs));
    }

    #[test]
    fn hire_tech_requires_a_position() {
        let listing = Listing::HireTech {
            position: "  ".to_owned(),
            pay: None,
        };
        assert_eq!(listing.validate(), Err(InvalidListingError::MissingPosition));
    }

    #[test]
    fn categories_parse_from_their_slugs() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("nail-art".parse::<Category>().is_err());
        assert!(Category::BeautySchool.is_directory());
        assert!(!Category::HireTech.is_directory());
    }
}
