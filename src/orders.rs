// Order lifecycle: hold, confirm, pay, status, refund and refund reconciliation
//
// Every call is keyed by the reseller order id. The stored aggregate is the
// only source of truth for idempotency checks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::balance::BalanceSupervisor;
use crate::config::EngineConfig;
use crate::error::{Entity, EngineError, EngineResult};
use crate::events::OrderEventDispatcher;
use crate::model::{
    HotelRecord, OrderAggregate, REFUND_STATUS_PAYMENT_FINALIZED, TRANSACTION_STATUS_PENDING,
};
use crate::repository::{HotelRepository, OrderRepository};
use crate::supplier::{
    AvailabilityRequest, ConfirmResponse, HoldResponse, HotelSupplier, OrderEnquiryResponse,
    OrderStatusResponse, PaymentResponse, RefundResponse,
};

const ROOM_NOT_AVAILABLE: &str = "Room is not available";

#[derive(Debug, Clone, Default)]
pub struct OrderPolicy {
    pub production: bool,
    // Hotels that may be held outside production
    pub whitelist: Vec<String>,
    pub reconcile_chunk_size: usize,
}

impl OrderPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            production: config.is_production(),
            whitelist: config.orders.available_hotels_whitelist.clone(),
            reconcile_chunk_size: config.sync.chunk_size,
        }
    }

    fn may_reserve(&self, hotel_id: &str) -> bool {
        self.production || self.whitelist.iter().any(|id| id == hotel_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefundRequest {
    pub order_id: i64,
    // Ids on the applicant (reseller) side, echoed back in refund events
    pub refund_request_id: i64,
    pub applicant_order_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizeResult {
    pub payment: PaymentResponse,
    pub status: OrderStatusResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetailView {
    pub order: OrderAggregate,
    pub hotel: HotelRecord,
}

pub struct OrderService {
    supplier: Arc<dyn HotelSupplier>,
    orders: Arc<dyn OrderRepository>,
    hotels: Arc<dyn HotelRepository>,
    balance: Arc<BalanceSupervisor>,
    events: OrderEventDispatcher,
    policy: OrderPolicy,
}

impl OrderService {
    pub fn new(
        supplier: Arc<dyn HotelSupplier>,
        orders: Arc<dyn OrderRepository>,
        hotels: Arc<dyn HotelRepository>,
        balance: Arc<BalanceSupervisor>,
        events: OrderEventDispatcher,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            supplier,
            orders,
            hotels,
            balance,
            events,
            policy,
        }
    }

    /// Places a hold with the supplier and records the order.
    ///
    /// The supplier's dates must match the requested ones to the day; a hold
    /// for other dates is rejected rather than stored.
    pub async fn hotel_available(&self, request: &AvailabilityRequest) -> EngineResult<HoldResponse> {
        if !self.policy.may_reserve(&request.hotel_id) {
            return Err(EngineError::HotelReserveForbidden);
        }

        let detail = self
            .supplier
            .order_detail(&request.hotel_id, &request.session_id, &request.option_id)
            .await?;

        let hold = self.supplier.place_hold(request).await.map_err(|err| {
            if err.to_string().contains(ROOM_NOT_AVAILABLE) {
                EngineError::RoomNotAvailable
            } else {
                err
            }
        })?;

        compare_stay_dates(request, &hold)?;

        let mut order = OrderAggregate::held(
            hold.reseller_order_id,
            hold.supplier_order_id.clone(),
            detail.hotel_id,
        );
        order.rooms = detail.rooms;
        order.currency = detail.currency;
        order.meal_plan = detail.meal_plan;
        order.non_refundable = detail.non_refundable;
        order.total_price = hold.total_price;
        order.status = hold.status.clone();
        self.orders.insert(order).await?;

        info!(
            order_id = hold.reseller_order_id,
            hotel_id = %request.hotel_id,
            tag = "hotel_available_completed",
            "hotel available completed successfully"
        );
        Ok(hold)
    }

    pub async fn confirm(&self, order_id: i64) -> EngineResult<ConfirmResponse> {
        let mut order = self.orders.find_by_reseller_id(order_id).await?;
        if order.confirmed {
            return Ok(ConfirmResponse {
                order_id,
                status: order.status,
            });
        }

        // Flagged before the supplier answers; only the persisted copy counts
        order.confirmed = true;
        let response = self.supplier.confirm(order_id).await?;
        order.status = response.status.clone();
        self.persist(&order, "confirm").await?;

        info!(order_id, tag = "confirm_order_completed", "confirm order completed successfully");
        Ok(response)
    }

    pub async fn pay(&self, order_id: i64) -> EngineResult<PaymentResponse> {
        let mut order = self.orders.find_by_reseller_id(order_id).await?;
        if order.is_paid() {
            return Ok(PaymentResponse {
                transaction_status: order.transaction_status,
                request_id: order.transaction_request_id,
                transaction_ids: order.transaction_ids,
                result_message: String::new(),
            });
        }

        let result = self.supplier.pay(order_id).await;
        self.spawn_balance_check();
        let response = result?;

        if response.transaction_status == TRANSACTION_STATUS_PENDING {
            error!(
                order_id,
                tag = "cannot_complete_order_payment",
                "hotel payment status is Pending, check whether the supplier account has adequate balance"
            );
        }

        order.update_transaction(
            response.transaction_status.clone(),
            response.request_id.clone(),
            response.transaction_ids.clone(),
        );
        self.persist(&order, "pay").await?;

        info!(order_id, tag = "pay_by_account_completed", "pay order by account completed successfully");
        Ok(response)
    }

    pub async fn status(&self, order_id: i64) -> EngineResult<OrderStatusResponse> {
        let mut order = self.orders.find_by_reseller_id(order_id).await?;
        let response = self.supplier.status(order_id).await?;

        order.status = response.status.clone();
        self.persist(&order, "status").await?;
        Ok(response)
    }

    pub async fn enquiry(&self, order_id: i64) -> EngineResult<OrderEnquiryResponse> {
        let mut order = self.orders.find_by_reseller_id(order_id).await?;
        let response = self
            .supplier
            .enquiry(order_id, &order.supplier_order_id)
            .await?;

        if !response.status.is_empty() {
            order.status = response.status.clone();
            self.persist(&order, "enquiry").await?;
        }
        Ok(response)
    }

    // confirm, then pay, then status; the first failure wins
    pub async fn finalize(&self, order_id: i64) -> EngineResult<FinalizeResult> {
        self.confirm(order_id).await?;
        let payment = self.pay(order_id).await?;
        let status = self.status(order_id).await?;

        info!(order_id, tag = "order_finalized_completed", "order finalized successfully");
        Ok(FinalizeResult { payment, status })
    }

    pub async fn refund(&self, request: &RefundRequest) -> EngineResult<RefundResponse> {
        let mut order = self.orders.find_by_reseller_id(request.order_id).await?;
        if order.has_refund_request() {
            return Ok(RefundResponse {
                order_id: request.order_id,
                refund_request_id: order.refund_request_id,
            });
        }

        let response = self
            .supplier
            .refund(request.order_id, &order.supplier_order_id)
            .await?;

        order.update_refund_request(
            response.refund_request_id,
            request.refund_request_id,
            request.applicant_order_id,
        );
        self.persist(&order, "refund").await?;
        self.events.refund_requested(&order).await;

        info!(
            order_id = request.order_id,
            refund_request_id = response.refund_request_id,
            tag = "new_refund_request",
            "order committed a refund request"
        );
        Ok(response)
    }

    /// Pulls refund status for outstanding refunds touched since `from` and
    /// finalizes the orders the supplier reports as paid out. Anything else is
    /// left for the next pass.
    pub async fn update_refunded_orders_payment_status(&self, from: DateTime<Utc>) {
        let ids = match self.orders.refund_candidates(from).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(error = %err, tag = "getting_refundable_orders_error", "cannot list orders waiting for refund");
                return;
            }
        };

        let mut finalized = 0;
        for chunk in ids.chunks(self.policy.reconcile_chunk_size.max(1)) {
            let report = match self.supplier.batch_refund_status(chunk, 1, chunk.len()).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(orders = chunk.len(), error = %err, tag = "refund_status_error", "cannot get refund status");
                    continue;
                }
            };

            for order_id in chunk {
                let item = match report.find(*order_id) {
                    Some(item) if item.refund_status == REFUND_STATUS_PAYMENT_FINALIZED => item,
                    _ => continue,
                };
                let line = match item.items.first() {
                    Some(line) => line,
                    None => continue,
                };

                let mut order = match self.orders.find_by_reseller_id(*order_id).await {
                    Ok(order) => order,
                    Err(err) => {
                        error!(order_id, error = %err, "cannot load order for refund update");
                        continue;
                    }
                };
                order.update_refund_result(
                    line.paid_amount,
                    line.reference_code.clone(),
                    item.refund_status.clone(),
                    line.refundable_amount,
                    line.total_penalty_amount,
                );
                if self.persist(&order, "refund_status").await.is_err() {
                    continue;
                }
                self.events.refund_finalized(&order).await;
                finalized += 1;
            }
        }

        info!(candidates = ids.len(), finalized, "refund status pulling completed");
    }

    pub async fn order_detail(&self, order_id: i64) -> EngineResult<OrderDetailView> {
        let order = self.orders.find_by_reseller_id(order_id).await?;
        let hotel = self
            .hotels
            .find_by_place_id(&order.hotel_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Hotel))?;
        Ok(OrderDetailView { order, hotel })
    }

    fn spawn_balance_check(&self) {
        let balance = self.balance.clone();
        tokio::spawn(async move {
            balance.check_adequate_balance().await;
        });
    }

    // The supplier side effect has already happened; a failed write is reported, not undone
    async fn persist(&self, order: &OrderAggregate, step: &'static str) -> EngineResult<()> {
        self.orders.update(order).await.map_err(|err| {
            error!(
                order_id = order.reseller_order_id,
                step,
                error = %err,
                tag = "cannot_update_order",
                "order stored state is behind the supplier"
            );
            err
        })
    }
}

fn stay_date(raw: &str) -> EngineResult<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| EngineError::Validation(format!("invalid date {}", raw)))
}

fn compare_stay_dates(request: &AvailabilityRequest, hold: &HoldResponse) -> EngineResult<()> {
    let check_in_matches = stay_date(&request.check_in)? == stay_date(&hold.check_in)?;
    let check_out_matches = stay_date(&request.check_out)? == stay_date(&hold.check_out)?;
    if check_in_matches && check_out_matches {
        return Ok(());
    }

    error!(
        reseller_check_in = %request.check_in,
        reseller_check_out = %request.check_out,
        provider_check_in = %hold.check_in,
        provider_check_out = %hold.check_out,
        tag = "dates_not_match_error",
        "check in or check out dates do not match"
    );
    Err(EngineError::DatesNotMatch {
        requested_check_in: request.check_in.clone(),
        requested_check_out: request.check_out.clone(),
        supplier_check_in: hold.check_in.clone(),
        supplier_check_out: hold.check_out.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BalanceConfig;
    use crate::events::recorder::RecordingPublisher;
    use crate::events::OrderEvent;
    use crate::model::fixtures::hotel;
    use crate::repository::{InMemoryHotelRepository, InMemoryOrderRepository};
    use crate::supplier::stub::StubSupplier;
    use crate::supplier::{RefundLine, RefundStatusItem, RefundStatusReport};
    use chrono::Duration;
    use test_case::test_case;

    struct Fixture {
        supplier: Arc<StubSupplier>,
        orders: Arc<InMemoryOrderRepository>,
        hotels: Arc<InMemoryHotelRepository>,
        publisher: Arc<RecordingPublisher>,
        service: OrderService,
    }

    fn fixture(policy: OrderPolicy) -> Fixture {
        let supplier = Arc::new(StubSupplier::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let hotels = Arc::new(InMemoryHotelRepository::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let balance = Arc::new(BalanceSupervisor::new(
            supplier.clone(),
            Vec::new(),
            BalanceConfig::default(),
        ));
        let service = OrderService::new(
            supplier.clone(),
            orders.clone(),
            hotels.clone(),
            balance,
            OrderEventDispatcher::new(publisher.clone(), "refunds"),
            policy,
        );
        Fixture {
            supplier,
            orders,
            hotels,
            publisher,
            service,
        }
    }

    fn whitelisted(hotel_id: &str) -> OrderPolicy {
        OrderPolicy {
            production: false,
            whitelist: vec![hotel_id.to_string()],
            reconcile_chunk_size: 2,
        }
    }

    fn availability(hotel_id: &str, check_in: &str, check_out: &str) -> AvailabilityRequest {
        AvailabilityRequest {
            hotel_id: hotel_id.to_string(),
            session_id: "session".to_string(),
            option_id: "option".to_string(),
            check_in: check_in.to_string(),
            check_out: check_out.to_string(),
            rooms: Vec::new(),
            phone_number: "0912".to_string(),
        }
    }

    fn hold(order_id: i64, check_in: &str, check_out: &str) -> HoldResponse {
        HoldResponse {
            reseller_order_id: order_id,
            supplier_order_id: format!("s-{}", order_id),
            status: "Held".to_string(),
            total_price: 1_200,
            check_in: check_in.to_string(),
            check_out: check_out.to_string(),
        }
    }

    async fn stored_order(f: &Fixture, order_id: i64) {
        f.orders
            .insert(OrderAggregate::held(order_id, format!("s-{}", order_id), "h1".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hold_is_recorded_when_dates_match() {
        let f = fixture(whitelisted("h1"));
        *f.supplier.hold.lock() = Some(hold(10, "2024-05-03T00:00:00", "2024-05-05T00:00:00"));

        let response = f
            .service
            .hotel_available(&availability("h1", "2024-05-03", "2024-05-05"))
            .await
            .unwrap();

        assert_eq!(response.reseller_order_id, 10);
        let order = f.orders.find_by_reseller_id(10).await.unwrap();
        assert_eq!(order.total_price, 1_200);
        assert_eq!(order.status, "Held");
        assert_eq!(order.currency, "IRR");
    }

    #[tokio::test]
    async fn mismatched_dates_fail_without_storing_the_order() {
        let f = fixture(whitelisted("h1"));
        *f.supplier.hold.lock() = Some(hold(10, "2024-05-02", "2024-05-05"));

        let result = f
            .service
            .hotel_available(&availability("h1", "2024-05-03", "2024-05-05"))
            .await;

        assert!(matches!(result, Err(EngineError::DatesNotMatch { .. })));
        assert!(f.orders.is_empty());
    }

    #[test_case(false, "h2", false ; "non whitelisted hotel outside production")]
    #[test_case(false, "h1", true ; "whitelisted hotel outside production")]
    #[test_case(true, "h2", true ; "any hotel in production")]
    fn reservation_guard(production: bool, hotel_id: &str, allowed: bool) {
        let policy = OrderPolicy {
            production,
            ..whitelisted("h1")
        };
        assert_eq!(policy.may_reserve(hotel_id), allowed);
    }

    #[tokio::test]
    async fn forbidden_hotel_never_reaches_the_supplier() {
        let f = fixture(whitelisted("h1"));

        let result = f
            .service
            .hotel_available(&availability("h2", "2024-05-03", "2024-05-05"))
            .await;

        assert!(matches!(result, Err(EngineError::HotelReserveForbidden)));
        assert_eq!(f.supplier.calls("order_detail"), 0);
        assert_eq!(f.supplier.calls("place_hold"), 0);
    }

    #[tokio::test]
    async fn supplier_room_rejection_maps_to_room_not_available() {
        let f = fixture(whitelisted("h1"));

        let result = f
            .service
            .hotel_available(&availability("h1", "2024-05-03", "2024-05-05"))
            .await;

        assert!(matches!(result, Err(EngineError::RoomNotAvailable)));
    }

    #[tokio::test]
    async fn confirm_twice_calls_supplier_once() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 5).await;

        let first = f.service.confirm(5).await.unwrap();
        let second = f.service.confirm(5).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.supplier.calls("confirm"), 1);
        assert!(f.orders.find_by_reseller_id(5).await.unwrap().confirmed);
    }

    #[tokio::test]
    async fn failed_confirm_leaves_order_unconfirmed() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 5).await;
        *f.supplier.fail_confirm.lock() = true;

        assert!(f.service.confirm(5).await.is_err());
        assert!(!f.orders.find_by_reseller_id(5).await.unwrap().confirmed);
    }

    #[tokio::test]
    async fn confirm_unknown_order_is_not_found() {
        let f = fixture(whitelisted("h1"));
        let err = f.service.confirm(404).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(Entity::Order)));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn pay_is_idempotent_on_stored_transaction() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 6).await;
        *f.supplier.payment.lock() = Some(PaymentResponse {
            transaction_status: TRANSACTION_STATUS_PENDING.to_string(),
            request_id: "req-1".to_string(),
            transaction_ids: vec!["t1".to_string(), "t2".to_string()],
            result_message: "ok".to_string(),
        });

        let first = f.service.pay(6).await.unwrap();
        let second = f.service.pay(6).await.unwrap();

        assert_eq!(f.supplier.calls("pay"), 1);
        assert_eq!(second.request_id, first.request_id);
        assert_eq!(second.transaction_ids, vec!["t1", "t2"]);
        assert_eq!(second.transaction_status, TRANSACTION_STATUS_PENDING);
    }

    #[tokio::test]
    async fn failed_payment_still_checks_balance() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 6).await;

        assert!(f.service.pay(6).await.is_err());
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.supplier.calls("balance"), 1);
        assert!(!f.orders.find_by_reseller_id(6).await.unwrap().is_paid());
    }

    #[tokio::test]
    async fn status_is_refreshed_on_every_call() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 7).await;

        f.service.status(7).await.unwrap();
        f.service.status(7).await.unwrap();

        assert_eq!(f.supplier.calls("status"), 2);
        assert_eq!(f.orders.find_by_reseller_id(7).await.unwrap().status, "Issued-2");
    }

    #[tokio::test]
    async fn finalize_stops_at_first_failure() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 8).await;

        // no scripted payment, so pay fails
        assert!(f.service.finalize(8).await.is_err());
        assert_eq!(f.supplier.calls("confirm"), 1);
        assert_eq!(f.supplier.calls("status"), 0);
    }

    #[tokio::test]
    async fn refund_is_submitted_once_and_announced() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 9).await;
        *f.supplier.refund_request_id.lock() = 900;
        let request = RefundRequest {
            order_id: 9,
            refund_request_id: 12,
            applicant_order_id: 34,
        };

        let first = f.service.refund(&request).await.unwrap();
        let second = f.service.refund(&request).await.unwrap();

        assert_eq!(first.refund_request_id, 900);
        assert_eq!(second.refund_request_id, 900);
        assert_eq!(f.supplier.calls("refund"), 1);
        let events = f.publisher.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], OrderEvent::RefundRequested(_)));
    }

    #[tokio::test]
    async fn reconciliation_finalizes_only_paid_out_refunds() {
        let f = fixture(whitelisted("h1"));
        for order_id in [1, 2, 3] {
            let mut order = OrderAggregate::held(order_id, format!("s-{}", order_id), "h1".into());
            order.update_refund_request(100 + order_id, 10 + order_id, 20 + order_id);
            f.orders.insert(order).await.unwrap();
        }
        let line = RefundLine {
            paid_amount: 1_000.0,
            reference_code: "ref-1".to_string(),
            refundable_amount: 700.0,
            total_penalty_amount: 300.0,
        };
        *f.supplier.refund_report.lock() = RefundStatusReport {
            items: vec![
                RefundStatusItem {
                    order_id: 1,
                    refund_status: REFUND_STATUS_PAYMENT_FINALIZED.to_string(),
                    items: vec![line.clone()],
                },
                RefundStatusItem {
                    order_id: 2,
                    refund_status: "Requested".to_string(),
                    items: vec![line],
                },
                RefundStatusItem {
                    order_id: 3,
                    refund_status: REFUND_STATUS_PAYMENT_FINALIZED.to_string(),
                    items: Vec::new(),
                },
            ],
            total: 3,
        };

        f.service
            .update_refunded_orders_payment_status(Utc::now() - Duration::days(1))
            .await;

        // chunk size 2 over three candidates
        assert_eq!(f.supplier.calls("batch_refund_status"), 2);
        let finalized = f.orders.find_by_reseller_id(1).await.unwrap();
        assert!(finalized.refund_finalized());
        assert_eq!(finalized.total_penalty_amount, 300.0);
        assert!(!f.orders.find_by_reseller_id(2).await.unwrap().refund_finalized());
        assert!(!f.orders.find_by_reseller_id(3).await.unwrap().refund_finalized());

        let events = f.publisher.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            OrderEvent::RefundFinalized(event) => {
                assert_eq!(event.refund_request_id, 11);
                assert_eq!(event.provider_order_id, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn order_detail_joins_the_hotel() {
        let f = fixture(whitelisted("h1"));
        stored_order(&f, 4).await;
        assert!(matches!(
            f.service.order_detail(4).await,
            Err(EngineError::NotFound(Entity::Hotel))
        ));

        f.hotels.upsert(hotel("h1", 500)).await.unwrap();
        let detail = f.service.order_detail(4).await.unwrap();
        assert_eq!(detail.hotel.place_id, "h1");
        assert_eq!(detail.order.reseller_order_id, 4);
    }
}
