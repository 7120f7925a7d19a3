//! Scripted stand-ins for the outbound ports. Each one answers from what the test told it, and remembers what it was
//! asked.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    db_types::{Metadata, Notification, Rupiah},
    traits::{
        ChargeRequest,
        ChargeResponse,
        ConfirmedDraft,
        DraftOrder,
        DraftOrderRequest,
        GatewayError,
        GatewayRefundRequest,
        GatewayRefundResponse,
        GatewayStatus,
        NotificationTransport,
        PaymentGateway,
        RateRequest,
        ShippingGateway,
        ShippingRate,
        TrackingInfo,
        TransportError,
    },
};

//--------------------------------------    Payment gateway    ---------------------------------------------------------
/// Charges succeed and statuses read `pending` until told otherwise. Refunds succeed with chargeback id
/// `CB-{refund_key}`.
#[derive(Default)]
pub struct MockPaymentGateway {
    charge_error: Mutex<Option<GatewayError>>,
    refund_error: Mutex<Option<GatewayError>>,
    statuses: Mutex<HashMap<String, Result<GatewayStatus, GatewayError>>>,
    charges: Mutex<Vec<ChargeRequest>>,
    refunds: Mutex<Vec<(String, GatewayRefundRequest)>>,
    status_calls: AtomicU64,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_charges_with(&self, error: GatewayError) {
        *self.charge_error.lock().unwrap() = Some(error);
    }

    pub fn fail_refunds_with(&self, error: GatewayError) {
        *self.refund_error.lock().unwrap() = Some(error);
    }

    /// Scripts the answer to `get_status` for one gateway order id.
    pub fn set_status(&self, external_id: &str, transaction_status: &str) {
        let status = GatewayStatus {
            transaction_status: transaction_status.to_string(),
            transaction_id: Some(format!("TX-{external_id}")),
            raw: Metadata::new().with("transaction_status", transaction_status),
            ..Default::default()
        };
        self.statuses.lock().unwrap().insert(external_id.to_string(), Ok(status));
    }

    pub fn set_status_error(&self, external_id: &str, error: GatewayError) {
        self.statuses.lock().unwrap().insert(external_id.to_string(), Err(error));
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<(String, GatewayRefundRequest)> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> u64 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        self.charges.lock().unwrap().push(request.clone());
        if let Some(e) = self.charge_error.lock().unwrap().clone() {
            return Err(e);
        }
        let bank = request.method.bank.clone();
        Ok(ChargeResponse {
            transaction_id: format!("TX-{}", request.external_id),
            va_number: bank.as_ref().map(|_| format!("8808{:012}", request.amount.value())),
            bank,
            qr_url: None,
            expiry_time: None,
            raw: Metadata::new().with("status_code", "201").with("order_id", &request.external_id),
        })
    }

    async fn get_status(&self, external_id: &str) -> Result<GatewayStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().unwrap().get(external_id) {
            Some(answer) => answer.clone(),
            None => Ok(GatewayStatus { transaction_status: "pending".into(), ..Default::default() }),
        }
    }

    async fn refund(
        &self,
        external_id: &str,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError> {
        self.refunds.lock().unwrap().push((external_id.to_string(), request.clone()));
        if let Some(e) = self.refund_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(GatewayRefundResponse { chargeback_id: format!("CB-{}", request.refund_key), status: "200".into() })
    }
}

//--------------------------------------   Shipping gateway    ---------------------------------------------------------
/// Quotes JNE REG at Rp15.000 and hands out draft ids `DRAFT-{n}` and waybills `WB{n:010}`. Tracking lookups fail
/// until a status is scripted for the waybill.
pub struct MockShippingGateway {
    rates: Mutex<Result<Vec<ShippingRate>, GatewayError>>,
    draft_error: Mutex<Option<GatewayError>>,
    confirm_error: Mutex<Option<GatewayError>>,
    tracking: Mutex<HashMap<String, TrackingInfo>>,
    drafts: AtomicU64,
    tracking_down: AtomicBool,
}

impl Default for MockShippingGateway {
    fn default() -> Self {
        Self {
            rates: Mutex::new(Ok(vec![jne_reg(15_000)])),
            draft_error: Mutex::new(None),
            confirm_error: Mutex::new(None),
            tracking: Mutex::new(HashMap::new()),
            drafts: AtomicU64::new(0),
            tracking_down: AtomicBool::new(false),
        }
    }
}

pub fn jne_reg(price: i64) -> ShippingRate {
    ShippingRate {
        courier_code: "jne".into(),
        courier_name: "JNE".into(),
        service_code: "reg".into(),
        service_name: "Reguler".into(),
        price: Rupiah::from(price),
        duration: "2-3".into(),
        service_type: "standard".into(),
    }
}

impl MockShippingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rates(&self, rates: Result<Vec<ShippingRate>, GatewayError>) {
        *self.rates.lock().unwrap() = rates;
    }

    pub fn fail_drafts_with(&self, error: GatewayError) {
        *self.draft_error.lock().unwrap() = Some(error);
    }

    pub fn fail_confirmations_with(&self, error: GatewayError) {
        *self.confirm_error.lock().unwrap() = Some(error);
    }

    pub fn set_tracking(&self, waybill: &str, info: TrackingInfo) {
        self.tracking.lock().unwrap().insert(waybill.to_string(), info);
    }

    /// Makes every tracking lookup fail, as if the aggregator were down.
    pub fn take_tracking_down(&self) {
        self.tracking_down.store(true, Ordering::SeqCst);
    }

    pub fn drafts_created(&self) -> u64 {
        self.drafts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShippingGateway for MockShippingGateway {
    async fn get_rates(&self, _request: RateRequest) -> Result<Vec<ShippingRate>, GatewayError> {
        self.rates.lock().unwrap().clone()
    }

    async fn create_draft_order(&self, _request: DraftOrderRequest) -> Result<DraftOrder, GatewayError> {
        if let Some(e) = self.draft_error.lock().unwrap().clone() {
            return Err(e);
        }
        let n = self.drafts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DraftOrder { id: format!("DRAFT-{n}") })
    }

    async fn confirm_draft_order(&self, draft_id: &str) -> Result<ConfirmedDraft, GatewayError> {
        if let Some(e) = self.confirm_error.lock().unwrap().clone() {
            return Err(e);
        }
        let n: u64 = draft_id.trim_start_matches("DRAFT-").parse().unwrap_or_default();
        Ok(ConfirmedDraft { waybill_id: format!("WB{n:010}"), tracking_id: Some(format!("TRK-{n}")) })
    }

    async fn track(&self, waybill_id: &str) -> Result<TrackingInfo, GatewayError> {
        if self.tracking_down.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("tracking is down".into()));
        }
        self.tracking
            .lock()
            .unwrap()
            .get(waybill_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected { code: "404".into(), message: format!("{waybill_id} not found") })
    }
}

//--------------------------------------  Notification sink    ---------------------------------------------------------
/// Keeps every notification it is given. Can be switched to refuse them.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, notification: &Notification) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError("SMTP relay refused the message".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
