//! # Domain Types
//!
//! Core domain types used throughout Aurum Ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Domain Types                               │
//! │                                                                     │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │   PriceRecord   │  │   LedgerEntry   │  │ TransactionRec. │      │
//! │  │  ─────────────  │  │  ─────────────  │  │  ─────────────  │      │
//! │  │  grade          │  │  debit/credit   │  │  sale/purchase/ │      │
//! │  │  buy/sell Money │  │  Weight + bal.  │  │  return/...     │      │
//! │  │  backdated flag │  │  reason         │  │  dedup key      │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! │                                                                     │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │    GoldItem     │  │ TransferRequest │  │ Reconciliation  │      │
//! │  │  status machine │  │  pending →      │  │  Snapshot/Alert │      │
//! │  │  weight + cost  │  │  approved →     │  │  diff + status  │      │
//! │  │                 │  │  received       │  │                 │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All enums persist as their `as_str` label; parsing back is fallible
//! and surfaces [`ValidationError::UnknownValue`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::units::{Money, Weight};

// =============================================================================
// Metal Grade
// =============================================================================

/// Metal purity grade.
///
/// `Has` (pure gold) is the reference grade: it anchors the accounting
/// for adjustments, scraps, transfers, and snapshot valuation. `None` is
/// the sentinel for ungraded stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetalGrade {
    Has,
    K22,
    K18,
    K14,
    K9,
    Platinum,
    None,
}

/// The grade used as the accounting anchor.
pub const REFERENCE_GRADE: MetalGrade = MetalGrade::Has;

impl MetalGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetalGrade::Has => "HAS",
            MetalGrade::K22 => "22K",
            MetalGrade::K18 => "18K",
            MetalGrade::K14 => "14K",
            MetalGrade::K9 => "9K",
            MetalGrade::Platinum => "PLATINUM",
            MetalGrade::None => "NONE",
        }
    }
}

impl fmt::Display for MetalGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetalGrade {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HAS" => Ok(MetalGrade::Has),
            "22K" => Ok(MetalGrade::K22),
            "18K" => Ok(MetalGrade::K18),
            "14K" => Ok(MetalGrade::K14),
            "9K" => Ok(MetalGrade::K9),
            "PLATINUM" => Ok(MetalGrade::Platinum),
            "NONE" => Ok(MetalGrade::None),
            other => Err(ValidationError::UnknownValue {
                kind: "metal grade",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// How a transaction was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Pos,
    Transfer,
    GoldExchange,
    Mixed,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Pos => "pos",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::GoldExchange => "gold_exchange",
            PaymentMethod::Mixed => "mixed",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "pos" => Ok(PaymentMethod::Pos),
            "transfer" => Ok(PaymentMethod::Transfer),
            "gold_exchange" => Ok(PaymentMethod::GoldExchange),
            "mixed" => Ok(PaymentMethod::Mixed),
            other => Err(ValidationError::UnknownValue {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Transaction Type
// =============================================================================

/// Business operation recorded by a transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Sale,
    Purchase,
    Return,
    Adjustment,
    Scrap,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Sale => "sale",
            TransactionType::Purchase => "purchase",
            TransactionType::Return => "return",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Scrap => "scrap",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(TransactionType::Sale),
            "purchase" => Ok(TransactionType::Purchase),
            "return" => Ok(TransactionType::Return),
            "adjustment" => Ok(TransactionType::Adjustment),
            "scrap" => Ok(TransactionType::Scrap),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(ValidationError::UnknownValue {
                kind: "transaction type",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Stock Ledger Enums
// =============================================================================

/// Side of a double-entry stock movement. Debit increases the branch
/// balance, credit decreases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryType::Debit),
            "credit" => Ok(EntryType::Credit),
            other => Err(ValidationError::UnknownValue {
                kind: "entry type",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a stock movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    Purchase,
    Sale,
    TransferIn,
    TransferOut,
    Adjustment,
    Fire,
    Scrap,
    Return,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::Purchase => "purchase",
            LedgerReason::Sale => "sale",
            LedgerReason::TransferIn => "transfer_in",
            LedgerReason::TransferOut => "transfer_out",
            LedgerReason::Adjustment => "adjustment",
            LedgerReason::Fire => "fire",
            LedgerReason::Scrap => "scrap",
            LedgerReason::Return => "return",
        }
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(LedgerReason::Purchase),
            "sale" => Ok(LedgerReason::Sale),
            "transfer_in" => Ok(LedgerReason::TransferIn),
            "transfer_out" => Ok(LedgerReason::TransferOut),
            "adjustment" => Ok(LedgerReason::Adjustment),
            "fire" => Ok(LedgerReason::Fire),
            "scrap" => Ok(LedgerReason::Scrap),
            "return" => Ok(LedgerReason::Return),
            other => Err(ValidationError::UnknownValue {
                kind: "ledger reason",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Item / Transfer / Alert Status
// =============================================================================

/// Lifecycle status of one physical gold item.
///
/// Each edge is driven by exactly one orchestrator operation:
/// sale (`InStock` → `Sold`), return (`Sold` → `Returned`), scrap
/// (`InStock` → `Scrapped`), transfer approve (`InStock` →
/// `Transferred`), transfer receive (`Transferred` → `InStock` at the
/// target branch). Nothing else may touch the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InStock,
    Sold,
    Transferred,
    Returned,
    Scrapped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::InStock => "in_stock",
            ItemStatus::Sold => "sold",
            ItemStatus::Transferred => "transferred",
            ItemStatus::Returned => "returned",
            ItemStatus::Scrapped => "scrapped",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(ItemStatus::InStock),
            "sold" => Ok(ItemStatus::Sold),
            "transferred" => Ok(ItemStatus::Transferred),
            "returned" => Ok(ItemStatus::Returned),
            "scrapped" => Ok(ItemStatus::Scrapped),
            other => Err(ValidationError::UnknownValue {
                kind: "item status",
                value: other.to_string(),
            }),
        }
    }
}

/// Transfer request lifecycle: `Pending` → `Approved` → `Received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Received,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Received => "received",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "approved" => Ok(TransferStatus::Approved),
            "received" => Ok(TransferStatus::Received),
            other => Err(ValidationError::UnknownValue {
                kind: "transfer status",
                value: other.to_string(),
            }),
        }
    }
}

/// Reconciliation alert lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Resolved,
    Rejected,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AlertStatus::Pending),
            "resolved" => Ok(AlertStatus::Resolved),
            "rejected" => Ok(AlertStatus::Rejected),
            other => Err(ValidationError::UnknownValue {
                kind: "alert status",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// One immutable price row. Never updated or deleted, only superseded
/// by newer rows; a backdated row corrects an earlier one by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub grade: MetalGrade,
    /// Buy price per gram.
    pub buy_price_g: Money,
    /// Sell price per gram. Always >= buy price.
    pub sell_price_g: Money,
    pub source: String,
    pub recorded_by: Option<String>,
    pub is_backdated: bool,
    pub original_price_id: Option<String>,
}

/// One immutable stock ledger row.
///
/// `running_balance_g` is the balance for (branch, product) *after* this
/// entry as a materialized convenience. The signed sum over the log is
/// the ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub branch_id: String,
    pub product_id: String,
    pub item_id: Option<String>,
    pub entry_type: EntryType,
    pub quantity_g: Weight,
    pub unit_price_g: Money,
    pub transaction_id: String,
    pub reason: LedgerReason,
    pub running_balance_g: Weight,
    pub created_at: DateTime<Utc>,
}

/// One row per business operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub branch_id: String,
    pub kind: TransactionType,
    pub item_id: Option<String>,
    pub customer_id: Option<String>,
    pub quantity_g: Weight,
    pub unit_price_g: Money,
    pub labor_amount: Money,
    pub total_amount: Money,
    /// Price row consumed by this operation.
    pub price_id: String,
    /// Settlement method. `None` for non-monetary operations
    /// (adjustment, scrap, production, transfer).
    pub payment_method: Option<PaymentMethod>,
    /// Client-supplied dedup key; (branch_id, key) is unique when set.
    pub client_request_id: Option<String>,
    /// Large-cash compliance flag.
    pub cash_report_flagged: bool,
    /// Manufacturing-loss cost recorded on sales, when the product has
    /// an effective loss rate.
    pub fire_cost: Option<Money>,
    pub parent_transaction_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// One discrete physical piece of stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldItem {
    pub id: String,
    pub product_id: String,
    pub branch_id: String,
    pub actual_weight_g: Weight,
    /// Cost basis per gram at acquisition.
    pub acquisition_price_g: Money,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inter-branch movement, its own small state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: String,
    pub source_branch_id: String,
    pub target_branch_id: String,
    pub item_id: String,
    /// Item weight snapshotted at request time.
    pub quantity_g: Weight,
    pub status: TransferStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_by: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// Point-in-time capture of a computed ledger balance and its valuation.
/// Unique per (branch, product, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub id: String,
    pub branch_id: String,
    pub product_id: String,
    pub snapshot_date: NaiveDate,
    pub balance_g: Weight,
    pub value_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// Raised when a later comparison finds the ledger balance has drifted
/// from a snapshot. `diff_g` is signed: current ledger − snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationAlert {
    pub id: String,
    pub branch_id: String,
    pub product_id: String,
    pub snapshot_date: NaiveDate,
    pub ledger_balance_g: Weight,
    pub snapshot_balance_g: Weight,
    pub diff_g: Weight,
    pub status: AlertStatus,
    pub resolution_transaction_id: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Operation Inputs
// =============================================================================

/// Input for recording a new price row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrice {
    pub grade: MetalGrade,
    pub buy_price_g: Money,
    pub sell_price_g: Money,
    pub source: String,
    pub recorded_by: Option<String>,
}

/// Input for gold-item intake (purchase-intake flow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoldItem {
    pub product_id: String,
    pub branch_id: String,
    pub actual_weight_g: Weight,
    pub acquisition_price_g: Money,
}

/// Input for a sale of one in-stock item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleInput {
    pub branch_id: String,
    pub item_id: String,
    /// Grade whose current sell price the sale consumes.
    pub grade: MetalGrade,
    pub customer_id: Option<String>,
    pub labor_amount: Money,
    pub payment_method: PaymentMethod,
    pub client_request_id: Option<String>,
    pub notes: Option<String>,
}

/// Input for a gram-based purchase (stock in, no specific item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseInput {
    pub branch_id: String,
    pub product_id: String,
    pub grade: MetalGrade,
    pub quantity_g: Weight,
    pub unit_price_g: Money,
    pub labor_amount: Money,
    pub payment_method: PaymentMethod,
    pub client_request_id: Option<String>,
    pub notes: Option<String>,
}

/// Input for returning a previously sold item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnInput {
    pub branch_id: String,
    pub parent_transaction_id: String,
    pub item_id: String,
    /// Actual re-weighed quantity.
    pub quantity_g: Weight,
    pub labor_refund_amount: Money,
    pub payment_method: PaymentMethod,
    pub client_request_id: Option<String>,
    pub notes: Option<String>,
}

/// Input for a manual stock correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentInput {
    pub branch_id: String,
    pub product_id: String,
    pub entry_type: EntryType,
    pub quantity_g: Weight,
    pub unit_price_g: Money,
    pub client_request_id: Option<String>,
    pub notes: Option<String>,
}

/// Input for scrapping one in-stock item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapInput {
    pub branch_id: String,
    pub item_id: String,
    pub client_request_id: Option<String>,
    pub notes: Option<String>,
}

/// Input for a production run with fire loss.
///
/// `output_quantity_g` must equal `input_quantity_g - fire_quantity_g`
/// exactly or the operation fails before any write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionFireInput {
    pub branch_id: String,
    pub input_product_id: String,
    pub output_product_id: String,
    pub grade: MetalGrade,
    pub input_quantity_g: Weight,
    pub output_quantity_g: Weight,
    pub fire_quantity_g: Weight,
    pub unit_price_g: Money,
    pub client_request_id: Option<String>,
    pub notes: Option<String>,
}

/// Input for opening an inter-branch transfer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequestInput {
    pub source_branch_id: String,
    pub target_branch_id: String,
    pub item_id: String,
}
