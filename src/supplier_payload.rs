// Wire shapes of the supplier's JSON answers
//
// Every answer is wrapped in `{ "result": ... }`. Fields the supplier omits or
// sends as null fall back to their defaults, and ids or amounts may arrive as
// either strings or numbers.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Envelope<T> {
    pub result: T,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub error: Option<ErrorMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginResult {
    #[serde(deserialize_with = "loose_string")]
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionResult {
    #[serde(deserialize_with = "loose_string")]
    pub session_id: String,
    #[serde(deserialize_with = "loose_string")]
    pub hotel_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Localized {
    #[serde(deserialize_with = "loose_string")]
    pub fa: String,
    #[serde(deserialize_with = "loose_string")]
    pub en: String,
}

/// Rate/room answer, polled until `final_result` is set.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateResult {
    pub final_result: bool,
    pub hotel: Option<RateHotel>,
    #[serde(deserialize_with = "nullable")]
    pub rooms: Vec<RateOption>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateOption {
    #[serde(deserialize_with = "loose_string")]
    pub id: String,
    #[serde(deserialize_with = "loose_i64")]
    pub price: i64,
    #[serde(deserialize_with = "loose_i64")]
    pub old_price: i64,
    #[serde(deserialize_with = "loose_string")]
    pub currency: String,
    #[serde(deserialize_with = "loose_string")]
    pub meal_plan: String,
    #[serde(deserialize_with = "nullable")]
    pub rooms: Vec<RateRoomLine>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateRoomLine {
    #[serde(deserialize_with = "loose_string")]
    pub name: String,
    #[serde(rename = "name_en", deserialize_with = "loose_string")]
    pub name_en: String,
    #[serde(deserialize_with = "loose_i64")]
    pub price: i64,
    #[serde(deserialize_with = "loose_i64")]
    pub price_per_night: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateHotel {
    #[serde(deserialize_with = "loose_string")]
    pub hotel_id: String,
    #[serde(rename = "_id", deserialize_with = "loose_string")]
    pub object_id: String,
    #[serde(deserialize_with = "nullable")]
    pub name: Localized,
    #[serde(deserialize_with = "nullable")]
    pub description: Localized,
    #[serde(deserialize_with = "loose_string")]
    pub address: String,
    #[serde(deserialize_with = "loose_string")]
    pub checkin_time: String,
    #[serde(deserialize_with = "loose_string")]
    pub checkout_time: String,
    #[serde(deserialize_with = "nullable")]
    pub city: Localized,
    #[serde(deserialize_with = "nullable")]
    pub state: Localized,
    #[serde(deserialize_with = "loose_i64")]
    pub star: i64,
    #[serde(deserialize_with = "loose_f64")]
    pub score: f64,
    #[serde(deserialize_with = "nullable")]
    pub location: GeoPoint,
    #[serde(deserialize_with = "nullable")]
    pub images: Vec<Image>,
    #[serde(deserialize_with = "nullable")]
    pub facilities: Vec<Facility>,
    #[serde(deserialize_with = "nullable")]
    pub badges: Vec<Badge>,
    #[serde(deserialize_with = "nullable")]
    pub places: Vec<NearbyPlace>,
}

impl RateHotel {
    // Listing-backed answers carry `hotelId`, catalogue ones only `_id`
    pub fn place_id(&self) -> &str {
        if self.hotel_id.is_empty() {
            &self.object_id
        } else {
            &self.hotel_id
        }
    }
}

/// GeoJSON-style `[lon, lat]` pair.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GeoPoint {
    #[serde(deserialize_with = "nullable")]
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Image {
    #[serde(deserialize_with = "loose_string")]
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Facility {
    #[serde(deserialize_with = "loose_i64")]
    pub id: i64,
    #[serde(deserialize_with = "nullable")]
    pub name: Localized,
    #[serde(deserialize_with = "loose_i64")]
    pub group_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Badge {
    #[serde(rename = "_id", deserialize_with = "loose_string")]
    pub id: String,
    #[serde(deserialize_with = "loose_string")]
    pub text: String,
    #[serde(deserialize_with = "loose_string")]
    pub icon: String,
    #[serde(deserialize_with = "nullable")]
    pub color: BadgeColor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BadgeColor {
    #[serde(deserialize_with = "loose_string")]
    pub text: String,
    #[serde(deserialize_with = "loose_string")]
    pub background: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NearbyPlace {
    #[serde(rename = "_id", deserialize_with = "loose_string")]
    pub id: String,
    #[serde(deserialize_with = "loose_string")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub location: Vec<f64>,
    #[serde(deserialize_with = "loose_f64")]
    pub distance: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HotelList {
    #[serde(deserialize_with = "nullable")]
    pub hotels_list: Vec<ListedHotel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListedHotel {
    #[serde(deserialize_with = "loose_string")]
    pub id: String,
    #[serde(deserialize_with = "loose_string")]
    pub giata_id: String,
    #[serde(deserialize_with = "loose_string")]
    pub accommodation: String,
}

// Row of the bundled cities file
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CityRow {
    #[serde(deserialize_with = "loose_string")]
    pub id: String,
    #[serde(deserialize_with = "loose_i64")]
    pub base_id: i64,
    #[serde(deserialize_with = "loose_string")]
    pub name: String,
    #[serde(deserialize_with = "loose_string")]
    pub name_en: String,
    #[serde(deserialize_with = "loose_string")]
    pub state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OptionInfo {
    #[serde(deserialize_with = "nullable")]
    pub policy: OptionPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptionPolicy {
    pub non_refundable: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HoldResult {
    #[serde(deserialize_with = "loose_i64")]
    pub id: i64,
    #[serde(deserialize_with = "loose_i64")]
    pub total_price: i64,
    #[serde(deserialize_with = "nullable")]
    pub details: HoldDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HoldDetails {
    #[serde(deserialize_with = "loose_string")]
    pub order_id: String,
    #[serde(deserialize_with = "loose_string")]
    pub status: String,
    #[serde(deserialize_with = "nullable")]
    pub detail: HoldStay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HoldStay {
    #[serde(deserialize_with = "loose_string")]
    pub check_in: String,
    #[serde(deserialize_with = "loose_string")]
    pub check_out: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentResult {
    #[serde(deserialize_with = "loose_string")]
    pub transaction_status: String,
    #[serde(deserialize_with = "loose_string")]
    pub request_id: String,
    #[serde(deserialize_with = "loose_strings")]
    pub transaction_ids: Vec<String>,
    #[serde(deserialize_with = "loose_string")]
    pub result_message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnquiryResult {
    #[serde(deserialize_with = "nullable")]
    pub items: Vec<EnquiryItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnquiryItem {
    #[serde(deserialize_with = "nullable")]
    pub items: Vec<EnquiryLine>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnquiryLine {
    #[serde(deserialize_with = "loose_string")]
    pub refund_status: String,
}

impl EnquiryResult {
    pub fn first_refund_status(&self) -> String {
        self.items
            .first()
            .and_then(|item| item.items.first())
            .map(|line| line.refund_status.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefundResult {
    #[serde(deserialize_with = "loose_i64")]
    pub refund_request_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefundReport {
    #[serde(deserialize_with = "loose_i64")]
    pub total_count: i64,
    #[serde(deserialize_with = "nullable")]
    pub items: Vec<RefundReportItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefundReportItem {
    #[serde(deserialize_with = "loose_i64")]
    pub order_id: i64,
    #[serde(deserialize_with = "loose_string")]
    pub refund_status: String,
    #[serde(deserialize_with = "nullable")]
    pub items: Vec<RefundReportLine>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefundReportLine {
    #[serde(deserialize_with = "loose_f64")]
    pub paid_amount: f64,
    #[serde(deserialize_with = "loose_string")]
    pub reference_code: String,
    #[serde(deserialize_with = "loose_f64")]
    pub refundable_amount: f64,
    #[serde(deserialize_with = "loose_f64")]
    pub total_penalty_amount: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BalanceResult {
    pub balance: Option<f64>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(text(&Value::deserialize(deserializer)?))
}

fn loose_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().map(text).collect(),
        _ => Vec::new(),
    })
}

fn loose_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}
