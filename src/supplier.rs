// Supplier boundary: the calls the engine makes against the external hotel API
// and the payloads it gets back.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::EngineResult;
use crate::model::{City, HotelIdentifier, HotelRecord, HotelType, OrderRoom};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomOccupancy {
    pub adults: u32,
    pub children_ages: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AvailabilityRequest {
    pub hotel_id: String,
    pub session_id: String,
    pub option_id: String,
    // Dates exactly as the reseller sent them, YYYY-MM-DD
    pub check_in: String,
    pub check_out: String,
    pub rooms: Vec<RoomOccupancy>,
    pub phone_number: String,
}

// Priced option details fetched right before a hold is placed
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderDetail {
    pub hotel_id: String,
    pub rooms: Vec<OrderRoom>,
    pub currency: String,
    pub meal_plan: String,
    pub non_refundable: bool,
    pub total_price: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HoldResponse {
    pub reseller_order_id: i64,
    pub supplier_order_id: String,
    pub status: String,
    pub total_price: i64,
    pub check_in: String,
    pub check_out: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConfirmResponse {
    pub order_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PaymentResponse {
    pub transaction_status: String,
    pub request_id: String,
    pub transaction_ids: Vec<String>,
    pub result_message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderStatusResponse {
    pub order_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderEnquiryResponse {
    pub order_id: i64,
    pub supplier_order_id: String,
    pub status: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefundResponse {
    pub order_id: i64,
    pub refund_request_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefundLine {
    pub paid_amount: f64,
    pub reference_code: String,
    pub refundable_amount: f64,
    pub total_penalty_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefundStatusItem {
    pub order_id: i64,
    pub refund_status: String,
    pub items: Vec<RefundLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RefundStatusReport {
    pub items: Vec<RefundStatusItem>,
    pub total: usize,
}

impl RefundStatusReport {
    pub fn find(&self, order_id: i64) -> Option<&RefundStatusItem> {
        self.items.iter().find(|item| item.order_id == order_id)
    }
}

#[async_trait]
pub trait HotelSupplier: Send + Sync + 'static {
    // Full hotel detail priced for the given stay; polls until the supplier has a final price
    async fn fetch_hotel_detail(
        &self,
        hotel_id: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> EngineResult<HotelRecord>;

    async fn list_cities(&self) -> EngineResult<Vec<City>>;

    // One page of hotel identifiers for a city
    async fn search_hotel_ids(
        &self,
        city: &City,
        skip: usize,
        limit: usize,
    ) -> EngineResult<Vec<HotelIdentifier>>;

    async fn hotel_type(&self, hotel_id: &str) -> EngineResult<HotelType>;

    async fn order_detail(
        &self,
        hotel_id: &str,
        session_id: &str,
        option_id: &str,
    ) -> EngineResult<OrderDetail>;

    async fn place_hold(&self, request: &AvailabilityRequest) -> EngineResult<HoldResponse>;

    async fn confirm(&self, order_id: i64) -> EngineResult<ConfirmResponse>;

    async fn pay(&self, order_id: i64) -> EngineResult<PaymentResponse>;

    async fn status(&self, order_id: i64) -> EngineResult<OrderStatusResponse>;

    async fn enquiry(
        &self,
        order_id: i64,
        supplier_order_id: &str,
    ) -> EngineResult<OrderEnquiryResponse>;

    async fn refund(&self, order_id: i64, supplier_order_id: &str) -> EngineResult<RefundResponse>;

    async fn batch_refund_status(
        &self,
        order_ids: &[i64],
        page: usize,
        size: usize,
    ) -> EngineResult<RefundStatusReport>;

    async fn balance(&self) -> EngineResult<f64>;
}

/// Walks the supplier's hotel listing city by city, page by page.
///
/// A city is exhausted when it returns a short page. A failing page is
/// reported once and the walk moves on to the next city.
pub struct HotelIdPages {
    supplier: Arc<dyn HotelSupplier>,
    cities: Vec<City>,
    page_size: usize,
    city_index: usize,
    skip: usize,
}

impl HotelIdPages {
    pub fn new(supplier: Arc<dyn HotelSupplier>, cities: Vec<City>, page_size: usize) -> Self {
        Self {
            supplier,
            cities,
            page_size: page_size.max(1),
            city_index: 0,
            skip: 0,
        }
    }

    pub async fn next_page(&mut self) -> Option<EngineResult<Vec<HotelIdentifier>>> {
        let city = self.cities.get(self.city_index)?.clone();
        let page = self
            .supplier
            .search_hotel_ids(&city, self.skip, self.page_size)
            .await;

        match &page {
            Ok(ids) if ids.len() >= self.page_size => self.skip += self.page_size,
            Ok(_) => self.next_city(),
            Err(err) => {
                warn!(city = %city.name, skip = self.skip, error = %err, "hotel listing page failed");
                self.next_city();
            }
        }
        Some(page)
    }

    fn next_city(&mut self) {
        self.city_index += 1;
        self.skip = 0;
    }
}
