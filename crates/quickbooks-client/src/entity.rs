//! QuickBooks entities exposed as list endpoints

use serde_json::Value;

use crate::error::{Error, Result};

/// Page size requested from the query endpoint (the QBO maximum).
pub const MAX_RESULTS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Invoice,
    Customer,
    SalesReceipt,
    Account,
    Bill,
    Purchase,
    Item,
    BillPayment,
}

impl Entity {
    pub const ALL: [Entity; 8] = [
        Entity::Invoice,
        Entity::Customer,
        Entity::SalesReceipt,
        Entity::Account,
        Entity::Bill,
        Entity::Purchase,
        Entity::Item,
        Entity::BillPayment,
    ];

    /// QBO table name, also the key under `QueryResponse`.
    pub fn table(self) -> &'static str {
        match self {
            Entity::Invoice => "Invoice",
            Entity::Customer => "Customer",
            Entity::SalesReceipt => "SalesReceipt",
            Entity::Account => "Account",
            Entity::Bill => "Bill",
            Entity::Purchase => "Purchase",
            Entity::Item => "Item",
            Entity::BillPayment => "BillPayment",
        }
    }

    /// Path segment under `/api/`.
    pub fn route(self) -> &'static str {
        match self {
            Entity::Invoice => "invoices",
            Entity::Customer => "customers",
            Entity::SalesReceipt => "salesreceipts",
            Entity::Account => "accounts",
            Entity::Bill => "bills",
            Entity::Purchase => "purchases",
            Entity::Item => "items",
            Entity::BillPayment => "billpayments",
        }
    }

    pub fn from_route(segment: &str) -> Option<Entity> {
        Entity::ALL.into_iter().find(|e| e.route() == segment)
    }

    pub fn query(self) -> String {
        format!("select * from {} maxresults {MAX_RESULTS}", self.table())
    }

    /// Pull the record array out of a query response.
    ///
    /// QBO omits the key entirely when no rows match, which is an empty list,
    /// not an error.
    pub fn extract(self, mut body: Value) -> Result<Vec<Value>> {
        let Some(query_response) = body.get_mut("QueryResponse") else {
            return Err(Error::Decode("response has no QueryResponse".into()));
        };
        match query_response.get_mut(self.table()).map(Value::take) {
            Some(Value::Array(records)) => Ok(records),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(Error::Decode(format!(
                "QueryResponse.{} is not an array: {}",
                self.table(),
                type_name(&other)
            ))),
        }
    }
}

/// Pull the company record out of a companyinfo response.
pub fn extract_company_info(mut body: Value) -> Result<Value> {
    match body.get_mut("CompanyInfo").map(Value::take) {
        Some(info @ Value::Object(_)) => Ok(info),
        _ => Err(Error::Decode("response has no CompanyInfo object".into())),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
