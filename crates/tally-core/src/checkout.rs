//! # Checkout Settlement
//!
//! Derives the sale-level money fields of an offline sale from the cart,
//! the tenders and the caller's loyalty/credit request.
//!
//! ## Settlement Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        settle()                                         │
//! │                                                                         │
//! │  cart lines (totals trusted as given)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  total = Σ line_total − cart discount                                  │
//! │       │                                                                 │
//! │       ├── points redeemed × point value  (capped by total, balance)    │
//! │       ├── store credit used              (capped by remainder, balance)│
//! │       ▼                                                                 │
//! │  amount due ──► Σ payments ≥ due ? ──NO──► InsufficientPayment         │
//! │       │                  │                                             │
//! │       │                 YES                                            │
//! │       ▼                  ▼                                             │
//! │  points earned      change = paid − due                                │
//! │  (on amount due)         │                                             │
//! │                          ├── convert requested AND change > minimum    │
//! │                          │        └──► credit granted, cash change 0   │
//! │                          └── otherwise cash change                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::validation::{
    validate_cart_size, validate_non_negative, validate_payment_amount, validate_quantity,
    validate_required,
};

// =============================================================================
// Inputs
// =============================================================================

/// A cart line as computed upstream. Line totals are trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub line_total_cents: i64,
}

/// The in-memory cart handed to the builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
    /// Discount applied to the whole sale on top of line discounts.
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// A tender entered at the register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub payment_method_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Loyalty and credit choices made by the cashier for this sale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyRequest {
    #[serde(default)]
    pub points_to_redeem: i64,
    #[serde(default)]
    pub credit_to_use_cents: i64,
    /// Turn change into store credit when it exceeds the configured minimum.
    #[serde(default)]
    pub convert_change_to_credit: bool,
}

/// What the terminal knows about the customer's balances, if cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomerBalances {
    pub loyalty_points: Option<i64>,
    pub credit_balance_cents: Option<i64>,
}

/// Terminal-level settlement rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutPolicy {
    /// Change is converted to credit only when strictly above this amount.
    pub change_to_credit_min_cents: i64,
    /// Monetary value of one redeemed point.
    pub point_value_cents: i64,
    /// Spend needed to earn one point. Zero disables earning.
    pub earn_unit_cents: i64,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        CheckoutPolicy {
            change_to_credit_min_cents: 100,
            point_value_cents: 1,
            earn_unit_cents: 100,
        }
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Sale-level money fields derived by [`settle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub points_redeemed: i64,
    pub points_value_cents: i64,
    pub credit_used_cents: i64,
    /// Total net of loyalty and credit deductions.
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub change_cents: i64,
    pub credit_granted_cents: i64,
    pub points_earned: i64,
}

/// Validates a cart and its tenders and derives the settlement.
///
/// Fails fast with [`CoreError::InsufficientPayment`] when the tenders do not
/// cover the total net of loyalty and credit deductions.
pub fn settle(
    cart: &Cart,
    payments: &[PaymentInput],
    loyalty: &LoyaltyRequest,
    balances: CustomerBalances,
    policy: &CheckoutPolicy,
) -> CoreResult<Settlement> {
    validate_cart(cart)?;
    for payment in payments {
        validate_required("payment method", &payment.payment_method_id)?;
        validate_payment_amount(payment.amount_cents)?;
    }
    validate_non_negative("points to redeem", loyalty.points_to_redeem)?;
    validate_non_negative("credit to use", loyalty.credit_to_use_cents)?;

    if cart.customer_id.is_none() {
        if loyalty.points_to_redeem > 0 {
            return Err(customer_required("Points redemption"));
        }
        if loyalty.credit_to_use_cents > 0 {
            return Err(customer_required("Store credit"));
        }
        if loyalty.convert_change_to_credit {
            return Err(customer_required("Change to credit"));
        }
    }

    let subtotal = checked_total(
        "subtotal",
        cart.lines.iter().map(|l| {
            Money::from_cents(l.unit_price_cents).checked_mul(l.quantity)
        }),
    )?;
    let line_discounts = checked_total(
        "line discounts",
        cart.lines.iter().map(|l| Some(Money::from_cents(l.discount_cents))),
    )?;
    let tax = checked_total(
        "tax",
        cart.lines.iter().map(|l| Some(Money::from_cents(l.tax_cents))),
    )?;
    let lines_total = checked_total(
        "cart total",
        cart.lines.iter().map(|l| Some(Money::from_cents(l.line_total_cents))),
    )?;
    let total = (lines_total - Money::from_cents(cart.discount_cents)).non_negative();

    // Points: capped by the known balance and by what the total can absorb.
    let mut points_redeemed = loyalty.points_to_redeem;
    if let Some(balance) = balances.loyalty_points {
        points_redeemed = points_redeemed.min(balance.max(0));
    }
    if policy.point_value_cents > 0 {
        points_redeemed = points_redeemed.min(total.cents() / policy.point_value_cents);
    } else {
        points_redeemed = 0;
    }
    let points_value = Money::from_cents(policy.point_value_cents)
        .checked_mul(points_redeemed)
        .ok_or_else(|| overflow("points value"))?;

    // Credit: capped by the remainder and the known balance.
    let after_points = total - points_value;
    let mut credit_used = loyalty.credit_to_use_cents.min(after_points.cents());
    if let Some(balance) = balances.credit_balance_cents {
        credit_used = credit_used.min(balance.max(0));
    }
    let credit_used = Money::from_cents(credit_used);

    let amount_due = (after_points - credit_used).non_negative();
    let amount_paid = checked_total(
        "amount paid",
        payments.iter().map(|p| Some(Money::from_cents(p.amount_cents))),
    )?;

    if amount_paid < amount_due {
        return Err(CoreError::InsufficientPayment {
            due_cents: amount_due.cents(),
            paid_cents: amount_paid.cents(),
        });
    }

    let change = amount_paid - amount_due;
    let (change, credit_granted) = if loyalty.convert_change_to_credit
        && change.cents() > policy.change_to_credit_min_cents
    {
        (Money::zero(), change)
    } else {
        (change, Money::zero())
    };

    let points_earned = if policy.earn_unit_cents > 0 {
        amount_due.cents() / policy.earn_unit_cents
    } else {
        0
    };

    Ok(Settlement {
        subtotal_cents: subtotal.cents(),
        discount_cents: line_discounts
            .checked_add(Money::from_cents(cart.discount_cents))
            .ok_or_else(|| overflow("discount"))?
            .cents(),
        tax_cents: tax.cents(),
        total_cents: total.cents(),
        points_redeemed,
        points_value_cents: points_value.cents(),
        credit_used_cents: credit_used.cents(),
        amount_due_cents: amount_due.cents(),
        amount_paid_cents: amount_paid.cents(),
        change_cents: change.cents(),
        credit_granted_cents: credit_granted.cents(),
        points_earned,
    })
}

fn validate_cart(cart: &Cart) -> CoreResult<()> {
    validate_cart_size(cart.lines.len())?;
    validate_non_negative("cart discount", cart.discount_cents)?;

    for line in &cart.lines {
        validate_required("product_id", &line.product_id)?;
        validate_quantity(line.quantity)?;
        validate_non_negative("unit price", line.unit_price_cents)?;
        validate_non_negative("line total", line.line_total_cents)?;
    }

    Ok(())
}

/// Sums amounts that may themselves have overflowed.
fn checked_total(
    field: &str,
    mut amounts: impl Iterator<Item = Option<Money>>,
) -> CoreResult<Money> {
    amounts
        .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount?))
        .ok_or_else(|| overflow(field))
}

fn overflow(field: &str) -> CoreError {
    CoreError::AmountOverflow {
        field: field.to_string(),
    }
}

fn customer_required(benefit: &str) -> CoreError {
    CoreError::CustomerRequired {
        benefit: benefit.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: &str, quantity: i64, unit: i64) -> CartLine {
        CartLine {
            product_id: product_id.to_string(),
            sku: product_id.to_uppercase(),
            name: product_id.to_string(),
            quantity,
            unit_price_cents: unit,
            discount_cents: 0,
            tax_cents: 0,
            line_total_cents: unit * quantity,
        }
    }

    fn cash(amount: i64) -> PaymentInput {
        PaymentInput {
            payment_method_id: "cash".to_string(),
            amount_cents: amount,
            reference: None,
        }
    }

    fn cart_for(customer: Option<&str>) -> Cart {
        Cart {
            lines: vec![line("coke", 2, 250), line("chips", 1, 500)],
            discount_cents: 0,
            customer_id: customer.map(String::from),
        }
    }

    #[test]
    fn test_exact_payment() {
        let s = settle(
            &cart_for(None),
            &[cash(1000)],
            &LoyaltyRequest::default(),
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap();

        assert_eq!(s.subtotal_cents, 1000);
        assert_eq!(s.total_cents, 1000);
        assert_eq!(s.amount_due_cents, 1000);
        assert_eq!(s.change_cents, 0);
        assert_eq!(s.points_earned, 10);
    }

    #[test]
    fn test_underpayment_fails_fast() {
        let err = settle(
            &cart_for(None),
            &[cash(999)],
            &LoyaltyRequest::default(),
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            CoreError::InsufficientPayment {
                due_cents: 1000,
                paid_cents: 999
            }
        ));
    }

    #[test]
    fn test_loyalty_and_credit_reduce_amount_due() {
        let loyalty = LoyaltyRequest {
            points_to_redeem: 200,
            credit_to_use_cents: 300,
            convert_change_to_credit: false,
        };
        let s = settle(
            &cart_for(Some("cust-1")),
            &[cash(500)],
            &loyalty,
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap();

        assert_eq!(s.points_value_cents, 200);
        assert_eq!(s.credit_used_cents, 300);
        assert_eq!(s.amount_due_cents, 500);
        assert_eq!(s.change_cents, 0);
    }

    #[test]
    fn test_balances_cap_redemption() {
        let loyalty = LoyaltyRequest {
            points_to_redeem: 5000,
            credit_to_use_cents: 5000,
            convert_change_to_credit: false,
        };
        let balances = CustomerBalances {
            loyalty_points: Some(100),
            credit_balance_cents: Some(50),
        };
        let s = settle(
            &cart_for(Some("cust-1")),
            &[cash(850)],
            &loyalty,
            balances,
            &CheckoutPolicy::default(),
        )
        .unwrap();

        assert_eq!(s.points_redeemed, 100);
        assert_eq!(s.credit_used_cents, 50);
        assert_eq!(s.amount_due_cents, 850);
    }

    #[test]
    fn test_change_converted_only_above_minimum() {
        let loyalty = LoyaltyRequest {
            convert_change_to_credit: true,
            ..Default::default()
        };
        let policy = CheckoutPolicy {
            change_to_credit_min_cents: 100,
            ..Default::default()
        };

        let at_minimum = settle(
            &cart_for(Some("cust-1")),
            &[cash(1100)],
            &loyalty,
            CustomerBalances::default(),
            &policy,
        )
        .unwrap();
        assert_eq!(at_minimum.change_cents, 100);
        assert_eq!(at_minimum.credit_granted_cents, 0);

        let above = settle(
            &cart_for(Some("cust-1")),
            &[cash(1101)],
            &loyalty,
            CustomerBalances::default(),
            &policy,
        )
        .unwrap();
        assert_eq!(above.change_cents, 0);
        assert_eq!(above.credit_granted_cents, 101);
    }

    #[test]
    fn test_loyalty_without_customer_rejected() {
        let loyalty = LoyaltyRequest {
            points_to_redeem: 10,
            ..Default::default()
        };
        let err = settle(
            &cart_for(None),
            &[cash(1000)],
            &loyalty,
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::CustomerRequired { .. }));
    }

    #[test]
    fn test_empty_cart_rejected() {
        let err = settle(
            &Cart::default(),
            &[cash(100)],
            &LoyaltyRequest::default(),
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_cart_discount_applies_to_total() {
        let mut cart = cart_for(None);
        cart.discount_cents = 200;
        let s = settle(
            &cart,
            &[cash(800)],
            &LoyaltyRequest::default(),
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap();
        assert_eq!(s.total_cents, 800);
        assert_eq!(s.discount_cents, 200);
    }

    #[test]
    fn test_overflowing_amounts_rejected() {
        let mut cart = cart_for(None);
        cart.lines = vec![CartLine {
            quantity: 2,
            unit_price_cents: i64::MAX / 2 + 1,
            line_total_cents: 0,
            ..line("p-1", 1, 0)
        }];

        let err = settle(
            &cart,
            &[cash(100)],
            &LoyaltyRequest::default(),
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::AmountOverflow { ref field } if field == "subtotal"));

        let err = settle(
            &cart_for(None),
            &[cash(i64::MAX), cash(1)],
            &LoyaltyRequest::default(),
            CustomerBalances::default(),
            &CheckoutPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::AmountOverflow { ref field } if field == "amount paid"));
    }
}
