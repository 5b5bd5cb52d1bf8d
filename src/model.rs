// Domain records owned by the engine: hotels, orders and reference data

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const REFUND_STATUS_PAYMENT_FINALIZED: &str = "PaymentFinalized";
pub const TRANSACTION_STATUS_PENDING: &str = "Pending";

// Accommodation kinds known to the supplier, keyed by its numeric type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HotelType {
    #[default]
    Hotel,
    HotelApartment,
}

impl HotelType {
    pub fn code(&self) -> i32 {
        match self {
            HotelType::Hotel => 204,
            HotelType::HotelApartment => 219,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HotelType::Hotel => "hotel",
            HotelType::HotelApartment => "hotelapartment",
        }
    }

    // Unknown codes fall back to a plain hotel
    pub fn from_code(code: i32) -> Self {
        match code {
            219 => HotelType::HotelApartment,
            _ => HotelType::Hotel,
        }
    }

    pub fn from_code_str(code: &str) -> Self {
        code.trim()
            .parse::<i32>()
            .map(Self::from_code)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelAmenity {
    pub id: i64,
    pub name: String,
    pub name_en: String,
    pub group_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelBadge {
    pub id: String,
    pub text: String,
    pub text_color: String,
    pub background_color: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelPlace {
    pub id: String,
    pub name: String,
    pub geo_location: String,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelRecord {
    pub place_id: String,
    pub room_id: String,
    pub hotel_type: HotelType,
    pub name: String,
    pub name_en: String,
    pub description: String,
    pub city: String,
    pub city_en: String,
    pub province: String,
    pub province_en: String,
    pub address: String,
    pub geo_location: String,
    pub images: Vec<String>,
    pub star: u8,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub check_in_time: String,
    pub check_out_time: String,
    pub capacity: u32,
    pub price: i64,
    pub old_price: i64,
    pub discount_price: i64,
    pub discount_percent: i64,
    pub amenities: Vec<HotelAmenity>,
    pub badges: Vec<HotelBadge>,
    pub places: Vec<HotelPlace>,
    pub rate_review_score: f64,
    pub rate_review_count: u32,
    pub sort: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl HotelRecord {
    pub fn new(place_id: impl Into<String>, check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            place_id: place_id.into(),
            room_id: "0".to_string(),
            hotel_type: HotelType::Hotel,
            name: String::new(),
            name_en: String::new(),
            description: String::new(),
            city: String::new(),
            city_en: String::new(),
            province: String::new(),
            province_en: String::new(),
            address: String::new(),
            geo_location: String::new(),
            images: Vec::new(),
            star: 0,
            check_in,
            check_out,
            check_in_time: String::new(),
            check_out_time: String::new(),
            capacity: 0,
            price: 0,
            old_price: 0,
            discount_price: 0,
            discount_percent: 0,
            amenities: Vec::new(),
            badges: Vec::new(),
            places: Vec::new(),
            rate_review_score: 0.0,
            rate_review_count: 0,
            sort: 0.0,
            updated_at: None,
        }
    }

    /// A zero price means the supplier has not priced the hotel yet.
    pub fn is_priced(&self) -> bool {
        self.price != 0
    }

    /// Sort weight pushed to the search index; unpriced hotels sink to the bottom.
    pub fn index_sort(&self) -> f64 {
        if self.is_priced() {
            self.sort
        } else {
            0.0
        }
    }

    pub fn update_rate_review(&mut self, count: u32, score: f64) {
        self.rate_review_count = count;
        self.rate_review_score = score;
    }
}

/// Folds a freshly fetched hotel into the stored one.
///
/// Scalar fields come from `incoming`; amenities and badges are merged by id so
/// entries only the stored copy knows about survive. Review data is owned by the
/// review pipeline and is kept from `stored`.
pub fn merge_hotels(stored: &HotelRecord, incoming: &HotelRecord) -> HotelRecord {
    let mut merged = incoming.clone();
    merged.place_id = stored.place_id.clone();
    merged.name_en = incoming.name_en.to_lowercase();
    merged.amenities = merge_by_id(&stored.amenities, &incoming.amenities, |a| a.id);
    merged.badges = merge_by_id(&stored.badges, &incoming.badges, |b| b.id.clone());
    merged.rate_review_score = stored.rate_review_score;
    merged.rate_review_count = stored.rate_review_count;
    merged.updated_at = stored.updated_at;
    merged
}

fn merge_by_id<T: Clone, K: PartialEq, F>(stored: &[T], incoming: &[T], id: F) -> Vec<T>
where
    F: Fn(&T) -> K,
{
    let mut merged = stored.to_vec();
    for item in incoming {
        match merged.iter_mut().find(|existing| id(existing) == id(item)) {
            Some(existing) => *existing = item.clone(),
            None => merged.push(item.clone()),
        }
    }
    merged
}

// Identifier page entry returned by the supplier's hotel listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelIdentifier {
    pub id: String,
    pub giata_id: String,
    pub hotel_type: Option<HotelType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub base_id: i64,
    pub name: String,
    pub name_en: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmenityCategory {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amenity {
    pub id: i64,
    pub name: String,
    pub name_en: String,
    pub icon: String,
    pub category: Option<AmenityCategory>,
}

// Catalogue entry for an amenity first seen on a hotel; icon and category are
// curated later
impl From<&HotelAmenity> for Amenity {
    fn from(amenity: &HotelAmenity) -> Self {
        Self {
            id: amenity.id,
            name: amenity.name.clone(),
            name_en: amenity.name_en.clone(),
            icon: String::new(),
            category: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRoom {
    pub name: String,
    pub name_en: String,
    pub price: i64,
    pub price_per_night: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAggregate {
    // Assigned by the order repository on insert
    pub id: u64,
    // Reseller-facing order id; every lifecycle call is keyed by it
    pub reseller_order_id: i64,
    pub supplier_order_id: String,
    pub hotel_id: String,
    pub rooms: Vec<OrderRoom>,
    pub total_price: i64,
    pub currency: String,
    pub meal_plan: String,
    pub non_refundable: bool,
    pub status: String,
    pub confirmed: bool,
    pub transaction_status: String,
    pub transaction_request_id: String,
    pub transaction_ids: Vec<String>,
    pub refund_request_id: i64,
    pub applicant_refund_request_id: i64,
    pub applicant_order_id: i64,
    pub paid_amount: f64,
    pub reference_code: String,
    pub refund_status: String,
    pub refundable_amount: f64,
    pub total_penalty_amount: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderAggregate {
    pub fn held(reseller_order_id: i64, supplier_order_id: String, hotel_id: String) -> Self {
        Self {
            id: 0,
            reseller_order_id,
            supplier_order_id,
            hotel_id,
            rooms: Vec::new(),
            total_price: 0,
            currency: String::new(),
            meal_plan: String::new(),
            non_refundable: false,
            status: String::new(),
            confirmed: false,
            transaction_status: String::new(),
            transaction_request_id: String::new(),
            transaction_ids: Vec::new(),
            refund_request_id: 0,
            applicant_refund_request_id: 0,
            applicant_order_id: 0,
            paid_amount: 0.0,
            reference_code: String::new(),
            refund_status: String::new(),
            refundable_amount: 0.0,
            total_penalty_amount: 0.0,
            updated_at: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        !self.transaction_request_id.is_empty()
    }

    pub fn has_refund_request(&self) -> bool {
        self.refund_request_id != 0
    }

    pub fn refund_finalized(&self) -> bool {
        self.refund_status == REFUND_STATUS_PAYMENT_FINALIZED
    }

    pub fn update_transaction(&mut self, status: String, request_id: String, ids: Vec<String>) {
        self.transaction_status = status;
        self.transaction_request_id = request_id;
        self.transaction_ids = ids;
    }

    pub fn update_refund_request(
        &mut self,
        refund_request_id: i64,
        applicant_refund_request_id: i64,
        applicant_order_id: i64,
    ) {
        self.refund_request_id = refund_request_id;
        self.applicant_refund_request_id = applicant_refund_request_id;
        self.applicant_order_id = applicant_order_id;
    }

    pub fn update_refund_result(
        &mut self,
        paid_amount: f64,
        reference_code: String,
        refund_status: String,
        refundable_amount: f64,
        total_penalty_amount: f64,
    ) {
        self.paid_amount = paid_amount;
        self.reference_code = reference_code;
        self.refund_status = refund_status;
        self.refundable_amount = refundable_amount;
        self.total_penalty_amount = total_penalty_amount;
    }
}
