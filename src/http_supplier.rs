// reqwest-backed supplier client
//
// Hotel catalogue calls go to `hotel_endpoint`, order calls to `order_endpoint`.
// Authenticated calls carry a bearer token obtained from the login endpoint and
// refreshed by the token job.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{RetryConfig, SupplierConfig};
use crate::error::{Entity, EngineError, EngineResult};
use crate::model::{
    City, HotelAmenity, HotelBadge, HotelIdentifier, HotelPlace, HotelRecord, HotelType,
    OrderRoom,
};
use crate::retry::{poll_until_ready, Attempt, DelaySchedule};
use crate::supplier::{
    AvailabilityRequest, ConfirmResponse, HoldResponse, HotelSupplier, OrderDetail,
    OrderEnquiryResponse, OrderStatusResponse, PaymentResponse, RefundLine, RefundResponse,
    RefundStatusItem, RefundStatusReport,
};
use crate::supplier_payload::{
    text, BalanceResult, CityRow, Envelope, EnquiryResult, ErrorBody, HoldResult, HotelList,
    LoginResult, OptionInfo, PaymentResult, RateResult, RefundReport, RefundResult,
    SessionResult,
};

const CHANNEL_HEADER: &str = "ab-channel";
const CHANNEL_NAME: &str = "JABAMA";

const TOKEN_ENDPOINT: &str = "/api/v1/hoteladmin/login";
const HOTEL_LIST_ENDPOINT: &str = "/api/v1/hoteladmin/get-hotels";
const SEARCH_DIRECT_ENDPOINT: &str = "/api/v1/hotel/search/direct";
const HOTEL_PRICE_ENDPOINT: &str = "/api/v1/hotel/rate/room";
const OPTION_INFO_ENDPOINT: &str = "/api/v1/hotel/general/info";
const AVAILABLE_ENDPOINT: &str = "/api/v2/hotel/book/available";
const ORDER_REFUND_ENDPOINT: &str = "/api/v1/profile/refunds";
const REFUND_STATUS_ENDPOINT: &str = "/api/v1/management/refunds";
const BALANCE_ENDPOINT: &str = "/api/v1/profile/account/balance";

pub struct HttpHotelSupplier {
    client: Client,
    config: SupplierConfig,
    retry: RetryConfig,
    token: RwLock<Option<String>>,
}

impl HttpHotelSupplier {
    pub fn new(config: SupplierConfig, retry: RetryConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            retry,
            token: RwLock::new(None),
        })
    }

    /// Logs in again and replaces the cached access token.
    pub async fn refresh_token(&self) -> EngineResult<()> {
        let body = json!({
            "username": self.config.username,
            "password": self.config.password,
        });
        let request = self.client.post(self.hotel_url(TOKEN_ENDPOINT)).json(&body);
        let login: Envelope<LoginResult> = self.send(request, false).await?;
        if login.result.token.is_empty() {
            return Err(EngineError::Upstream(
                "login answered without a token".to_string(),
            ));
        }
        *self.token.write() = Some(login.result.token);
        debug!("supplier access token refreshed");
        Ok(())
    }

    async fn bearer(&self) -> EngineResult<String> {
        let cached = self.token.read().clone();
        match cached {
            Some(token) => Ok(token),
            None => {
                Box::pin(self.refresh_token()).await?;
                self.token
                    .read()
                    .clone()
                    .ok_or_else(|| EngineError::Upstream("no access token".to_string()))
            }
        }
    }

    fn hotel_url(&self, path: &str) -> String {
        format!("{}{}", self.config.hotel_endpoint, path)
    }

    fn order_url(&self, path: &str) -> String {
        format!("{}{}", self.config.order_endpoint, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        authenticated: bool,
    ) -> EngineResult<T> {
        let mut request = request.header(CHANNEL_HEADER, CHANNEL_NAME);
        if authenticated {
            request = request.bearer_auth(self.bearer().await?);
        }
        read_json(request.send().await?).await
    }

    async fn list_hotels(
        &self,
        body: Value,
        skip: usize,
        limit: usize,
    ) -> EngineResult<Vec<HotelIdentifier>> {
        let request = self
            .client
            .post(self.hotel_url(HOTEL_LIST_ENDPOINT))
            .query(&[("limit", limit), ("skip", skip)])
            .json(&body);
        let listing: Envelope<HotelList> = self.send(request, true).await?;
        Ok(hotel_identifiers(listing.result))
    }

    // Rate/room answers with `finalResult: false` until pricing is done
    async fn poll_rooms(
        &self,
        url: String,
        session_id: &str,
        hotel_id: &str,
        schedule: DelaySchedule,
    ) -> EngineResult<RateResult> {
        let body = json!({ "sessionId": session_id, "hotelId": hotel_id });
        poll_until_ready(&schedule, |_| {
            let request = self.client.post(url.clone()).json(&body);
            async move {
                let rate: Envelope<RateResult> = self.send(request, false).await?;
                if rate.result.final_result {
                    Ok(Attempt::Ready(rate.result))
                } else {
                    Ok(Attempt::Pending)
                }
            }
        })
        .await
    }

    async fn open_session(
        &self,
        url: String,
        hotel_id: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> EngineResult<(String, String)> {
        let body = json!({
            "checkIn": check_in.format("%Y-%m-%d").to_string(),
            "checkOut": check_out.format("%Y-%m-%d").to_string(),
            "rooms": [{ "adults": [30], "children": [] }],
            "destination": { "id": hotel_id, "type": "Hotel" },
        });
        let session: Envelope<SessionResult> =
            self.send(self.client.post(url).json(&body), false).await?;
        let SessionResult {
            session_id,
            hotel_id: supplier_hotel_id,
        } = session.result;
        if supplier_hotel_id.is_empty() {
            return Ok((session_id, hotel_id.to_string()));
        }
        Ok((session_id, supplier_hotel_id))
    }
}

#[async_trait]
impl HotelSupplier for HttpHotelSupplier {
    async fn fetch_hotel_detail(
        &self,
        hotel_id: &str,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> EngineResult<HotelRecord> {
        let (session_id, supplier_hotel_id) = self
            .open_session(
                self.hotel_url(SEARCH_DIRECT_ENDPOINT),
                hotel_id,
                check_in,
                check_out,
            )
            .await?;
        let rate = self
            .poll_rooms(
                self.hotel_url(HOTEL_PRICE_ENDPOINT),
                &session_id,
                &supplier_hotel_id,
                self.retry.hotel_detail_schedule(),
            )
            .await?;
        hotel_from_rate(rate, check_in, check_out)
    }

    async fn list_cities(&self) -> EngineResult<Vec<City>> {
        let raw = tokio::fs::read_to_string(&self.config.cities_file)
            .await
            .map_err(|err| {
                EngineError::Upstream(format!("cannot read {}: {}", self.config.cities_file, err))
            })?;
        let rows: Vec<CityRow> = serde_json::from_str(&raw)?;
        Ok(cities_from_rows(rows))
    }

    async fn search_hotel_ids(
        &self,
        city: &City,
        skip: usize,
        limit: usize,
    ) -> EngineResult<Vec<HotelIdentifier>> {
        let body = json!({
            "hotelGiataId": "",
            "cityId": "",
            "hotelName": "",
            "cityBaseId": city.base_id,
        });
        self.list_hotels(body, skip, limit).await
    }

    async fn hotel_type(&self, hotel_id: &str) -> EngineResult<HotelType> {
        let body = json!({ "hotelGiataId": hotel_id, "cityId": "", "hotelName": "" });
        let hotels = self.list_hotels(body, 0, 1).await?;
        hotels
            .into_iter()
            .next()
            .map(|hotel| hotel.hotel_type.unwrap_or_default())
            .ok_or(EngineError::NotFound(Entity::Hotel))
    }

    async fn order_detail(
        &self,
        hotel_id: &str,
        session_id: &str,
        option_id: &str,
    ) -> EngineResult<OrderDetail> {
        let info_body = json!({
            "sessionId": session_id,
            "hotelId": hotel_id,
            "optionId": option_id,
        });
        let info: Envelope<OptionInfo> = self
            .send(
                self.client
                    .post(self.order_url(OPTION_INFO_ENDPOINT))
                    .json(&info_body),
                false,
            )
            .await?;
        let rooms = self
            .poll_rooms(
                self.order_url(HOTEL_PRICE_ENDPOINT),
                session_id,
                hotel_id,
                self.retry.rooms_schedule(),
            )
            .await?;
        Ok(order_detail_from_rate(hotel_id, option_id, info.result, rooms))
    }

    async fn place_hold(&self, request: &AvailabilityRequest) -> EngineResult<HoldResponse> {
        info!(
            hotel_id = %request.hotel_id,
            option_id = %request.option_id,
            tag = "hotel_available_request",
            "placing hold"
        );
        let body = json!({
            "sessionId": request.session_id,
            "hotelId": request.hotel_id,
            "optionId": request.option_id,
            "checkIn": request.check_in,
            "checkOut": request.check_out,
            "rooms": request.rooms,
            "phoneNumber": request.phone_number,
        });
        let hold: Envelope<HoldResult> = self
            .send(
                self.client
                    .post(self.order_url(AVAILABLE_ENDPOINT))
                    .json(&body),
                true,
            )
            .await?;
        let HoldResult {
            id,
            total_price,
            details,
        } = hold.result;
        Ok(HoldResponse {
            reseller_order_id: id,
            supplier_order_id: details.order_id,
            status: details.status,
            total_price,
            check_in: details.detail.check_in,
            check_out: details.detail.check_out,
        })
    }

    async fn confirm(&self, order_id: i64) -> EngineResult<ConfirmResponse> {
        let url = self.order_url(&format!("/api/v1/coordinator/order/{}/confirm", order_id));
        let confirmed: Envelope<Value> = self.send(self.client.post(url), true).await?;
        if confirmed.result.as_bool() != Some(true) {
            return Err(EngineError::Upstream(format!(
                "order {} was not confirmed",
                order_id
            )));
        }
        Ok(ConfirmResponse {
            order_id,
            status: "Confirmed".to_string(),
        })
    }

    async fn pay(&self, order_id: i64) -> EngineResult<PaymentResponse> {
        let url = self.order_url(&format!(
            "/api/v1/coordinator/order/{}/pay-by-bank-and-account",
            order_id
        ));
        let request = self.client.post(url).json(&json!({ "redirectUrl": "" }));
        let payment: Envelope<PaymentResult> = self.send(request, true).await?;
        let PaymentResult {
            transaction_status,
            request_id,
            transaction_ids,
            result_message,
        } = payment.result;
        Ok(PaymentResponse {
            transaction_status,
            request_id,
            transaction_ids,
            result_message,
        })
    }

    async fn status(&self, order_id: i64) -> EngineResult<OrderStatusResponse> {
        let url = self.order_url(&format!("/api/v1/coordinator/order/{}/status", order_id));
        let status: Envelope<Value> = self.send(self.client.get(url), true).await?;
        Ok(OrderStatusResponse {
            order_id,
            status: text(&status.result),
        })
    }

    async fn enquiry(
        &self,
        order_id: i64,
        supplier_order_id: &str,
    ) -> EngineResult<OrderEnquiryResponse> {
        let url = self.order_url(&format!("/api/v1/profile/refunds/enquiry/{}", order_id));
        let request = self
            .client
            .get(url)
            .query(&[("providerId", supplier_order_id)]);
        let enquiry: Envelope<Value> = self.send(request, true).await?;
        let details = enquiry.result;
        // Details are handed back verbatim; only the status is read out of them
        let status = serde_json::from_value::<EnquiryResult>(details.clone())
            .map(|result| result.first_refund_status())
            .unwrap_or_default();
        Ok(OrderEnquiryResponse {
            order_id,
            supplier_order_id: supplier_order_id.to_string(),
            status,
            details,
        })
    }

    async fn refund(&self, order_id: i64, supplier_order_id: &str) -> EngineResult<RefundResponse> {
        let body = json!({
            "refundRequestType": "Personal",
            "refundPaymentMethod": "UserAccount",
            "orderId": order_id.to_string(),
            "items": [{ "referenceCode": supplier_order_id }],
        });
        let refund: Envelope<RefundResult> = self
            .send(
                self.client
                    .post(self.order_url(ORDER_REFUND_ENDPOINT))
                    .json(&body),
                true,
            )
            .await?;
        Ok(RefundResponse {
            order_id,
            refund_request_id: refund.result.refund_request_id,
        })
    }

    async fn batch_refund_status(
        &self,
        order_ids: &[i64],
        page: usize,
        size: usize,
    ) -> EngineResult<RefundStatusReport> {
        let mut query: Vec<(&str, String)> =
            vec![("page_no", page.to_string()), ("page_size", size.to_string())];
        query.extend(order_ids.iter().map(|id| ("orderIds", id.to_string())));
        let request = self
            .client
            .get(self.order_url(REFUND_STATUS_ENDPOINT))
            .query(&query);
        let report: Envelope<RefundReport> = self.send(request, false).await?;
        Ok(refund_status_report(report.result))
    }

    async fn balance(&self) -> EngineResult<f64> {
        let balance: Envelope<BalanceResult> = self
            .send(self.client.get(self.order_url(BALANCE_ENDPOINT)), true)
            .await?;
        balance
            .result
            .balance
            .ok_or_else(|| EngineError::Upstream("balance missing from response".to_string()))
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> EngineResult<T> {
    let status = response.status();
    let raw = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .ok()
            .and_then(|body| body.error)
            .map(|error| error.message)
            .filter(|message| !message.is_empty())
            .unwrap_or(raw);
        warn!(status = status.as_u16(), %message, tag = "supplier_response_error", "supplier call failed");
        return Err(EngineError::Upstream(message));
    }
    Ok(serde_json::from_str(&raw)?)
}

// "lat,lon" from a GeoJSON-style [lon, lat] pair
fn geo_location(coordinates: &[f64]) -> String {
    match coordinates {
        [lon, lat] => format!("{:.6},{:.6}", lat, lon),
        _ => String::new(),
    }
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text
}

/// Builds a hotel record from a priced rate/room answer.
pub(crate) fn hotel_from_rate(
    rate: RateResult,
    check_in: NaiveDate,
    check_out: NaiveDate,
) -> EngineResult<HotelRecord> {
    let hotel = rate
        .hotel
        .ok_or_else(|| EngineError::Upstream("rate response without hotel".to_string()))?;

    let mut record = HotelRecord::new(hotel.place_id().to_string(), check_in, check_out);

    if let Some(room) = rate.rooms.into_iter().next() {
        record.room_id = room.id;
        record.price = room.price;
        record.old_price = room.old_price;
    }
    if record.old_price != 0 && record.old_price > record.price {
        let discount = record.old_price - record.price;
        record.discount_price = discount;
        record.discount_percent =
            ((discount as f64 / record.old_price as f64) * 100.0).round() as i64;
    }

    record.geo_location = geo_location(&hotel.location.coordinates);
    record.name = hotel.name.fa;
    record.name_en = hotel.name.en;
    record.description = strip_tags(&hotel.description.fa);
    record.address = hotel.address;
    record.check_in_time = hotel.checkin_time;
    record.check_out_time = hotel.checkout_time;
    record.city = hotel.city.fa;
    record.city_en = hotel.city.en;
    record.province = hotel.state.fa;
    record.province_en = hotel.state.en;
    record.star = hotel.star.clamp(0, 5) as u8;
    record.capacity = 2;
    record.sort = hotel.score;
    record.images = hotel.images.into_iter().map(|image| image.url).collect();
    record.amenities = hotel
        .facilities
        .into_iter()
        .map(|facility| HotelAmenity {
            id: facility.id,
            name: facility.name.fa,
            name_en: facility.name.en.to_lowercase(),
            group_id: facility.group_id,
        })
        .collect();
    record.badges = hotel
        .badges
        .into_iter()
        .map(|badge| HotelBadge {
            id: badge.id,
            text: badge.text,
            text_color: badge.color.text,
            background_color: badge.color.background,
            icon: badge.icon,
        })
        .collect();
    record.places = hotel
        .places
        .into_iter()
        .map(|place| HotelPlace {
            geo_location: geo_location(&place.location),
            id: place.id,
            name: place.name,
            distance: place.distance,
        })
        .collect();

    Ok(record)
}

fn hotel_identifiers(listing: HotelList) -> Vec<HotelIdentifier> {
    listing
        .hotels_list
        .into_iter()
        .map(|hotel| HotelIdentifier {
            hotel_type: (!hotel.accommodation.is_empty())
                .then(|| HotelType::from_code_str(&hotel.accommodation)),
            id: hotel.id,
            giata_id: hotel.giata_id,
        })
        .collect()
}

fn cities_from_rows(rows: Vec<CityRow>) -> Vec<City> {
    rows.into_iter()
        .map(|row| City {
            id: row.id,
            base_id: row.base_id,
            name: row.name,
            name_en: row.name_en,
            state: row.state,
        })
        .collect()
}

fn order_detail_from_rate(
    hotel_id: &str,
    option_id: &str,
    info: OptionInfo,
    rate: RateResult,
) -> OrderDetail {
    let option = rate.rooms.into_iter().find(|room| room.id == option_id);

    let (rooms, total_price, currency, meal_plan) = match option {
        Some(option) => (
            option
                .rooms
                .into_iter()
                .map(|room| OrderRoom {
                    name: room.name,
                    name_en: room.name_en,
                    price: room.price,
                    price_per_night: room.price_per_night,
                })
                .collect(),
            option.price,
            option.currency,
            option.meal_plan,
        ),
        None => {
            warn!(hotel_id, option_id, "option missing from priced rooms");
            (Vec::new(), 0, String::new(), String::new())
        }
    };

    OrderDetail {
        hotel_id: hotel_id.to_string(),
        rooms,
        currency,
        meal_plan,
        non_refundable: info.policy.non_refundable,
        total_price,
    }
}

fn refund_status_report(report: RefundReport) -> RefundStatusReport {
    let items = report
        .items
        .into_iter()
        .map(|item| RefundStatusItem {
            order_id: item.order_id,
            refund_status: item.refund_status,
            items: item
                .items
                .into_iter()
                .map(|line| RefundLine {
                    paid_amount: line.paid_amount,
                    reference_code: line.reference_code,
                    refundable_amount: line.refundable_amount,
                    total_penalty_amount: line.total_penalty_amount,
                })
                .collect(),
        })
        .collect();
    RefundStatusReport {
        items,
        total: report.total_count.max(0) as usize,
    }
}
