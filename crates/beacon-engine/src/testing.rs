//! In-memory gateway that records every call, for orchestrator and handler
//! tests.
//!
//! Each unit of work stages a copy of the world and publishes it on commit,
//! so rolled-back work is invisible while its calls stay in the log.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_core::{
    Cart, CartLine, CartStatus, Money, NewSale, Payment, PaymentMethod, Sale, SaleStatus,
};

use crate::gateway::{
    CartGateway, GatewayError, GatewayResult, SaleGateway, StockGateway, UnitOfWork,
    UnitOfWorkFactory,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin,
    GetCart(i64),
    SetCartStatus(i64, CartStatus),
    CreateSale(i64),
    AddPayment(i64, PaymentMethod, i64),
    CompleteSale(i64),
    GetSale(i64),
    FindSaleByKey(String),
    Payments(i64),
    MarkRefunded(i64),
    Decrement(i64, i64),
    Increment(i64, i64),
    Commit,
    Rollback,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::SetCartStatus(..)
                | Call::CreateSale(_)
                | Call::AddPayment(..)
                | Call::CompleteSale(_)
                | Call::MarkRefunded(_)
                | Call::Decrement(..)
                | Call::Increment(..)
        )
    }
}

#[derive(Debug, Clone, Default)]
struct World {
    carts: HashMap<i64, Cart>,
    sales: BTreeMap<i64, Sale>,
    payments: Vec<Payment>,
    stock: HashMap<i64, i64>,
    next_id: i64,
}

impl World {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Injected failures.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `begin` fails as if the store were unreachable.
    pub unavailable: bool,
    /// The second cart read of a unit of work sees the cart COMPLETED.
    pub complete_cart_on_recheck: bool,
    /// `commit` fails as if the connection dropped.
    pub fail_commit: bool,
    /// `begin` stalls this long before taking its snapshot.
    pub begin_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    world: World,
    calls: Vec<Call>,
    faults: Faults,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cart 42, total $100.00: product 7 × 2 at $50.00, 10 units in stock.
    pub fn with_cart_42() -> Self {
        let gateway = Self::new();
        gateway.add_cart(cart(42, vec![line(7, 2, 5000)]));
        gateway.set_stock(7, 10);
        gateway
    }

    pub fn add_cart(&self, cart: Cart) {
        self.inner.lock().unwrap().world.carts.insert(cart.id, cart);
    }

    pub fn set_stock(&self, product_id: i64, quantity: i64) {
        self.inner.lock().unwrap().world.stock.insert(product_id, quantity);
    }

    pub fn set_faults(&self, faults: Faults) {
        self.inner.lock().unwrap().faults = faults;
    }

    pub fn cart(&self, id: i64) -> Option<Cart> {
        self.inner.lock().unwrap().world.carts.get(&id).cloned()
    }

    pub fn stock(&self, product_id: i64) -> Option<i64> {
        self.inner.lock().unwrap().world.stock.get(&product_id).copied()
    }

    pub fn sales(&self) -> Vec<Sale> {
        self.inner.lock().unwrap().world.sales.values().cloned().collect()
    }

    pub fn payments(&self, sale_id: i64) -> Vec<Payment> {
        let inner = self.inner.lock().unwrap();
        inner
            .world
            .payments
            .iter()
            .filter(|p| p.sale_id == sale_id)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }
}

pub fn line(product_id: i64, quantity: i64, unit_price_cents: i64) -> CartLine {
    CartLine {
        product_id,
        quantity,
        unit_price_cents,
    }
}

pub fn cart(id: i64, lines: Vec<CartLine>) -> Cart {
    Cart {
        id,
        terminal_id: 3,
        cashier_id: 9,
        status: CartStatus::Active,
        lines,
        discount_cents: 0,
    }
}

#[async_trait]
impl UnitOfWorkFactory for MemoryGateway {
    async fn begin(&self) -> GatewayResult<Box<dyn UnitOfWork>> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(Call::Begin);
            if inner.faults.unavailable {
                return Err(GatewayError::Unavailable("primary store offline".into()));
            }
            inner.faults.begin_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock().unwrap();
        Ok(Box::new(MemoryUnitOfWork {
            shared: self.inner.clone(),
            staged: inner.world.clone(),
            cart_reads: 0,
        }))
    }
}

pub struct MemoryUnitOfWork {
    shared: Arc<Mutex<Inner>>,
    staged: World,
    cart_reads: usize,
}

impl MemoryUnitOfWork {
    fn record(&self, call: Call) -> Faults {
        let mut inner = self.shared.lock().unwrap();
        inner.calls.push(call);
        inner.faults.clone()
    }
}

#[async_trait]
impl CartGateway for MemoryUnitOfWork {
    async fn get_cart(&mut self, id: i64) -> GatewayResult<Option<Cart>> {
        let faults = self.record(Call::GetCart(id));
        self.cart_reads += 1;
        let mut cart = self.staged.carts.get(&id).cloned();
        if faults.complete_cart_on_recheck && self.cart_reads >= 2 {
            if let Some(cart) = cart.as_mut() {
                cart.status = CartStatus::Completed;
            }
        }
        Ok(cart)
    }

    async fn set_cart_status(&mut self, id: i64, status: CartStatus) -> GatewayResult<()> {
        self.record(Call::SetCartStatus(id, status));
        let cart = self
            .staged
            .carts
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found("Cart", id))?;
        cart.status = status;
        Ok(())
    }
}

#[async_trait]
impl SaleGateway for MemoryUnitOfWork {
    async fn create_sale(&mut self, sale: &NewSale) -> GatewayResult<i64> {
        self.record(Call::CreateSale(sale.cart_id));
        if let Some(key) = &sale.idempotency_key {
            if self.staged.sales.values().any(|s| s.idempotency_key.as_ref() == Some(key)) {
                return Err(GatewayError::Conflict(format!("duplicate idempotency key {}", key)));
            }
        }
        let id = self.staged.next_id();
        self.staged.sales.insert(
            id,
            Sale {
                id,
                cart_id: sale.cart_id,
                terminal_id: sale.terminal_id,
                cashier_id: sale.cashier_id,
                total_cents: sale.total_cents,
                discount_cents: sale.discount_cents,
                status: SaleStatus::Pending,
                receipt_number: None,
                idempotency_key: sale.idempotency_key.clone(),
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(id)
    }

    async fn add_payment(
        &mut self,
        sale_id: i64,
        method: PaymentMethod,
        amount: Money,
        reference: Option<&str>,
    ) -> GatewayResult<i64> {
        self.record(Call::AddPayment(sale_id, method, amount.cents()));
        if !self.staged.sales.contains_key(&sale_id) {
            return Err(GatewayError::not_found("Sale", sale_id));
        }
        let id = self.staged.next_id();
        self.staged.payments.push(Payment {
            id,
            sale_id,
            method,
            amount_cents: amount.cents(),
            reference: reference.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn complete_sale(&mut self, sale_id: i64, receipt_number: &str) -> GatewayResult<()> {
        self.record(Call::CompleteSale(sale_id));
        let sale = self
            .staged
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| GatewayError::not_found("Sale", sale_id))?;
        if sale.status != SaleStatus::Pending {
            return Err(GatewayError::Conflict(format!("sale {} is {}", sale_id, sale.status)));
        }
        sale.status = SaleStatus::Completed;
        sale.receipt_number = Some(receipt_number.to_string());
        sale.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_sale(&mut self, id: i64) -> GatewayResult<Option<Sale>> {
        self.record(Call::GetSale(id));
        Ok(self.staged.sales.get(&id).cloned())
    }

    async fn find_sale_by_idempotency_key(&mut self, key: &str) -> GatewayResult<Option<Sale>> {
        self.record(Call::FindSaleByKey(key.to_string()));
        Ok(self
            .staged
            .sales
            .values()
            .find(|s| s.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn payments(&mut self, sale_id: i64) -> GatewayResult<Vec<Payment>> {
        self.record(Call::Payments(sale_id));
        Ok(self
            .staged
            .payments
            .iter()
            .filter(|p| p.sale_id == sale_id)
            .cloned()
            .collect())
    }

    async fn mark_refunded(&mut self, sale_id: i64) -> GatewayResult<()> {
        self.record(Call::MarkRefunded(sale_id));
        let sale = self
            .staged
            .sales
            .get_mut(&sale_id)
            .ok_or_else(|| GatewayError::not_found("Sale", sale_id))?;
        if sale.status != SaleStatus::Completed {
            return Err(GatewayError::Conflict(format!("sale {} is {}", sale_id, sale.status)));
        }
        sale.status = SaleStatus::Refunded;
        Ok(())
    }
}

#[async_trait]
impl StockGateway for MemoryUnitOfWork {
    async fn decrement(&mut self, product_id: i64, quantity: i64) -> GatewayResult<()> {
        self.record(Call::Decrement(product_id, quantity));
        let level = self
            .staged
            .stock
            .get_mut(&product_id)
            .ok_or_else(|| GatewayError::not_found("Stock", product_id))?;
        if *level < quantity {
            return Err(GatewayError::InsufficientStock {
                product_id,
                requested: quantity,
                available: *level,
            });
        }
        *level -= quantity;
        Ok(())
    }

    async fn increment(&mut self, product_id: i64, quantity: i64) -> GatewayResult<()> {
        self.record(Call::Increment(product_id, quantity));
        *self.staged.stock.entry(product_id).or_insert(0) += quantity;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(&mut self) -> GatewayResult<()> {
        let mut inner = self.shared.lock().unwrap();
        inner.calls.push(Call::Commit);
        if inner.faults.fail_commit {
            return Err(GatewayError::Unavailable("connection dropped during commit".into()));
        }
        inner.world = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        self.record(Call::Rollback);
        self.staged = World::default();
        Ok(())
    }
}
