//! QuickBooks Online REST client: vendors, customers, accounts, bills and
//! purchases, plus attachment upload.

use std::str::FromStr;

use async_trait::async_trait;
use billflow_core::{
    AccountId, AccountType, Entity, EntityId, EntityKind, EntityRef, LedgerAccount, Money,
    NewEntity, TransactionId, TransactionKind, TransactionRecord,
};
use billflow_intake::{
    Attachment, EntityRegistry, LedgerClient, LedgerError, NewTransaction, PostingLine,
    TransactionRegistry,
};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Map, Value};

use crate::error::ConnectorError;
use crate::http::{ApiClient, RetryPolicy};
use crate::oauth::RefreshingToken;

// ── Constants ───────────────────────────────────────────────────────

const QBO_API_BASE: &str = "https://quickbooks.api.intuit.com";
const QBO_SANDBOX_BASE: &str = "https://sandbox-quickbooks.api.intuit.com";
pub const QBO_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
const QBO_QUERY_LIMIT: usize = 1000;
const MINOR_VERSION: &str = "75";
const SERVICE: &str = "QuickBooks";

pub fn base_url(sandbox: bool) -> &'static str {
    if sandbox {
        QBO_SANDBOX_BASE
    } else {
        QBO_API_BASE
    }
}

fn extract_qbo_error(body: &Value, status: u16) -> String {
    body["Fault"]["Error"][0]["Detail"]
        .as_str()
        .or_else(|| body["Fault"]["Error"][0]["Message"].as_str())
        .or_else(|| body["fault"]["error"][0]["detail"].as_str())
        .or_else(|| body["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

fn entity_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Vendor => "Vendor",
        EntityKind::Customer => "Customer",
    }
}

fn transaction_name(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Bill => "Bill",
        TransactionKind::Purchase => "Purchase",
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Amounts arrive as numbers or strings depending on the endpoint.
fn parse_amount(val: &Value) -> Option<Money> {
    if let Some(s) = val.as_str() {
        Money::from_str(s).ok()
    } else if let Some(n) = val.as_f64() {
        Money::from_f64(n)
    } else {
        None
    }
}

fn non_empty(val: &Value) -> Option<String> {
    val.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn required_id(value: &Value, what: &str) -> Result<String, ConnectorError> {
    non_empty(&value["Id"])
        .ok_or_else(|| ConnectorError::invalid(SERVICE, format!("{what} without Id")))
}

/// `Line1, Line2, City`, skipping blank parts.
pub fn format_address(addr: &Value) -> Option<String> {
    let parts: Vec<String> = ["Line1", "Line2", "City"]
        .iter()
        .filter_map(|k| non_empty(&addr[*k]))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Vendors and customers. Billing address first, then a distinct shipping
/// address.
pub fn parse_entity(value: &Value) -> Result<Entity, ConnectorError> {
    let id = required_id(value, "entity")?;
    let display_name = value["DisplayName"].as_str().unwrap_or("").to_string();

    let mut addresses = Vec::new();
    for key in ["BillAddr", "ShipAddr"] {
        if let Some(addr) = format_address(&value[key]) {
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        }
    }

    Ok(Entity {
        id: EntityId(id),
        display_name,
        company_name: non_empty(&value["CompanyName"]),
        addresses,
    })
}

pub fn parse_transaction(
    kind: TransactionKind,
    value: &Value,
) -> Result<TransactionRecord, ConnectorError> {
    let id = required_id(value, "transaction")?;
    let counterparty = match kind {
        TransactionKind::Bill => &value["VendorRef"],
        TransactionKind::Purchase => &value["EntityRef"],
    };

    let line_amounts = value["Line"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|l| l["DetailType"].as_str() != Some("SubTotalLineDetail"))
        .filter_map(|l| parse_amount(&l["Amount"]))
        .collect();

    Ok(TransactionRecord {
        id: TransactionId(id),
        counterparty_name: non_empty(&counterparty["name"]),
        total_amount: parse_amount(&value["TotalAmt"]).unwrap_or_default(),
        txn_date: value["TxnDate"]
            .as_str()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        doc_number: non_empty(&value["DocNumber"]),
        line_amounts,
    })
}

pub fn parse_account(value: &Value) -> Result<LedgerAccount, ConnectorError> {
    let id = required_id(value, "account")?;
    Ok(LedgerAccount {
        id: AccountId(id),
        name: value["Name"].as_str().unwrap_or("").to_string(),
        account_type: AccountType::from_ledger_label(value["AccountType"].as_str().unwrap_or("")),
    })
}

// ── Payloads ────────────────────────────────────────────────────────

fn reference(entity: &EntityRef) -> Value {
    json!({ "value": entity.id.0, "name": entity.name })
}

pub fn vendor_payload(entity: &NewEntity) -> Value {
    let mut body = Map::new();
    body.insert("DisplayName".into(), json!(entity.display_name));
    if let Some(company) = &entity.company_name {
        body.insert("CompanyName".into(), json!(company));
    }
    Value::Object(body)
}

fn line_payload(line: &PostingLine) -> Value {
    let mut detail = Map::new();
    detail.insert("AccountRef".into(), json!({ "value": line.account.0 }));
    if let Some(customer) = &line.customer {
        detail.insert("CustomerRef".into(), reference(customer));
    }
    json!({
        "DetailType": "AccountBasedExpenseLineDetail",
        "Amount": line.amount.to_f64(),
        "Description": line.description,
        "AccountBasedExpenseLineDetail": detail,
    })
}

/// Bill or Purchase body. Purchases are recorded as card payments from the
/// funding account.
pub fn transaction_payload(tx: &NewTransaction) -> Value {
    let mut body = Map::new();
    match tx.kind {
        TransactionKind::Bill => {
            body.insert("VendorRef".into(), reference(&tx.counterparty));
        }
        TransactionKind::Purchase => {
            let mut entity = reference(&tx.counterparty);
            entity["type"] = json!("Vendor");
            body.insert("EntityRef".into(), entity);
            body.insert("PaymentType".into(), json!("CreditCard"));
            if let Some(account) = &tx.payment_account {
                body.insert("AccountRef".into(), json!({ "value": account.0 }));
            }
        }
    }
    if let Some(date) = tx.txn_date {
        body.insert("TxnDate".into(), json!(date.format("%Y-%m-%d").to_string()));
    }
    if let Some(date) = tx.due_date {
        body.insert("DueDate".into(), json!(date.format("%Y-%m-%d").to_string()));
    }
    if let Some(number) = &tx.doc_number {
        body.insert("DocNumber".into(), json!(number));
    }
    if let Some(memo) = &tx.memo {
        body.insert("PrivateNote".into(), json!(memo));
    }
    body.insert("Line".into(), Value::Array(tx.lines.iter().map(line_payload).collect()));
    Value::Object(body)
}

pub fn attachable_metadata(
    kind: TransactionKind,
    id: &TransactionId,
    attachment: &Attachment,
) -> Value {
    json!({
        "AttachableRef": [{ "EntityRef": { "type": transaction_name(kind), "value": id.0 } }],
        "FileName": attachment.filename,
        "ContentType": attachment.content_type(),
    })
}

// ── Client ──────────────────────────────────────────────────────────

pub struct QuickBooksClient {
    api: ApiClient,
    token: RefreshingToken,
    base_url: String,
    realm_id: String,
}

impl QuickBooksClient {
    pub fn new(
        token: RefreshingToken,
        realm_id: impl Into<String>,
        sandbox: bool,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            api: ApiClient::new(SERVICE, extract_qbo_error)?,
            token,
            base_url: base_url(sandbox).to_string(),
            realm_id: realm_id.into(),
        })
    }

    fn company_url(&self, path: &str) -> String {
        format!("{}/v3/company/{}/{path}", self.base_url, self.realm_id)
    }

    /// `select * from <entity>`, paged until a short page comes back.
    async fn query_all(&self, entity: &str) -> Result<Vec<Value>, ConnectorError> {
        let url = self.company_url("query");
        let mut all = Vec::new();
        let mut start = 1usize;

        loop {
            let query = format!(
                "select * from {entity} STARTPOSITION {start} MAXRESULTS {QBO_QUERY_LIMIT}"
            );
            let body = self
                .api
                .send_authorized(&self.token, RetryPolicy::Idempotent, |http, token| {
                    http.get(&url)
                        .bearer_auth(token)
                        .header("Accept", "application/json")
                        .query(&[("query", query.as_str()), ("minorversion", MINOR_VERSION)])
                })
                .await?;

            let page = body["QueryResponse"][entity].as_array().cloned().unwrap_or_default();
            let fetched = page.len();
            all.extend(page);
            if fetched < QBO_QUERY_LIMIT {
                break;
            }
            start += QBO_QUERY_LIMIT;
        }

        tracing::debug!(entity, count = all.len(), "queried ledger");
        Ok(all)
    }

    async fn create(&self, entity: &str, payload: &Value) -> Result<Value, ConnectorError> {
        let url = self.company_url(&entity.to_lowercase());
        let body = self
            .api
            .send_authorized(&self.token, RetryPolicy::ThrottleOnly, |http, token| {
                http.post(&url)
                    .bearer_auth(token)
                    .header("Accept", "application/json")
                    .query(&[("minorversion", MINOR_VERSION)])
                    .json(payload)
            })
            .await?;
        match body.get(entity) {
            Some(created) => Ok(created.clone()),
            None => {
                Err(ConnectorError::invalid(SERVICE, format!("create response has no {entity}")))
            }
        }
    }
}

#[async_trait]
impl EntityRegistry for QuickBooksClient {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, LedgerError> {
        let rows = self.query_all(entity_name(kind)).await?;
        Ok(rows.iter().map(parse_entity).collect::<Result<_, _>>()?)
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        entity: &NewEntity,
    ) -> Result<Entity, LedgerError> {
        let payload = match kind {
            EntityKind::Vendor => vendor_payload(entity),
            EntityKind::Customer => json!({ "DisplayName": entity.display_name }),
        };
        let created = self.create(entity_name(kind), &payload).await?;
        Ok(parse_entity(&created)?)
    }
}

#[async_trait]
impl TransactionRegistry for QuickBooksClient {
    async fn list_transactions(
        &self,
        kind: TransactionKind,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let rows = self.query_all(transaction_name(kind)).await?;
        Ok(rows.iter().map(|r| parse_transaction(kind, r)).collect::<Result<_, _>>()?)
    }
}

#[async_trait]
impl LedgerClient for QuickBooksClient {
    async fn list_accounts(&self) -> Result<Vec<LedgerAccount>, LedgerError> {
        let rows = self.query_all("Account").await?;
        Ok(rows.iter().map(parse_account).collect::<Result<_, _>>()?)
    }

    async fn create_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord, LedgerError> {
        let name = transaction_name(transaction.kind);
        let created = self.create(name, &transaction_payload(transaction)).await?;
        Ok(parse_transaction(transaction.kind, &created)?)
    }

    async fn attach_file(
        &self,
        kind: TransactionKind,
        id: &TransactionId,
        attachment: &Attachment,
    ) -> Result<(), LedgerError> {
        let url = self.company_url("upload");
        let metadata = attachable_metadata(kind, id, attachment).to_string();

        let body = self
            .api
            .send_authorized(&self.token, RetryPolicy::ThrottleOnly, |http, token| {
                let mut json_headers = HeaderMap::new();
                json_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                let mut file_headers = HeaderMap::new();
                file_headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(attachment.content_type()));

                let form = Form::new()
                    .part("file_metadata_01", Part::text(metadata.clone()).headers(json_headers))
                    .part(
                        "file_content_01",
                        Part::bytes(attachment.data.clone())
                            .file_name(attachment.filename.clone())
                            .headers(file_headers),
                    );
                http.post(&url)
                    .bearer_auth(token)
                    .header("Accept", "application/json")
                    .query(&[("minorversion", MINOR_VERSION)])
                    .multipart(form)
            })
            .await?;

        let response = &body["AttachableResponse"][0];
        if response.get("Fault").is_some() {
            return Err(LedgerError::Rejected {
                operation: "attach".into(),
                message: extract_qbo_error(response, 400),
            });
        }
        tracing::info!(%kind, %id, file = %attachment.filename, "attachment linked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_customer_addresses() {
        let customer = json!({
            "Id": "58",
            "DisplayName": "Smith Residence",
            "BillAddr": {"Line1": "12 Ocean Ave", "City": "Chatham", "PostalCode": "02633"},
            "ShipAddr": {"Line1": "12 Ocean Ave", "City": "Chatham"}
        });
        let entity = parse_entity(&customer).unwrap();
        assert_eq!(entity.id.0, "58");
        assert_eq!(entity.addresses, vec!["12 Ocean Ave, Chatham"]);
        assert_eq!(entity.company_name, None);
    }

    #[test]
    fn parses_bill_with_string_and_number_amounts() {
        let bill = json!({
            "Id": "145",
            "VendorRef": {"value": "56", "name": "ABC Supply Co"},
            "TotalAmt": 93.25,
            "TxnDate": "2025-03-15",
            "DocNumber": "INV-1042",
            "Line": [
                {"Amount": 50.0, "DetailType": "AccountBasedExpenseLineDetail"},
                {"Amount": "43.25", "DetailType": "AccountBasedExpenseLineDetail"}
            ]
        });
        let record = parse_transaction(TransactionKind::Bill, &bill).unwrap();
        assert_eq!(record.counterparty_name.as_deref(), Some("ABC Supply Co"));
        assert_eq!(record.line_total(), Money::from_cents(9325));
        assert_eq!(record.txn_date, NaiveDate::from_ymd_opt(2025, 3, 15));
        assert_eq!(record.doc_number.as_deref(), Some("INV-1042"));
    }

    #[test]
    fn purchase_counterparty_comes_from_entity_ref() {
        let purchase = json!({
            "Id": "9",
            "EntityRef": {"value": "56", "name": "Home Depot"},
            "TotalAmt": 12
        });
        let record = parse_transaction(TransactionKind::Purchase, &purchase).unwrap();
        assert_eq!(record.counterparty_name.as_deref(), Some("Home Depot"));
        assert!(record.line_amounts.is_empty());
        assert_eq!(record.txn_date, None);
    }

    #[test]
    fn parses_account_types() {
        let row = json!({"Id": "35", "Name": "Checking", "AccountType": "Bank"});
        let account = parse_account(&row).unwrap();
        assert_eq!(account.account_type, AccountType::Bank);
        assert!(parse_account(&json!({"Name": "no id"})).is_err());
    }

    fn transaction(kind: TransactionKind) -> NewTransaction {
        NewTransaction {
            kind,
            counterparty: EntityRef { id: EntityId::from("56"), name: "ABC Supply Co".into() },
            txn_date: NaiveDate::from_ymd_opt(2025, 3, 15),
            due_date: None,
            doc_number: Some("INV-1042".into()),
            memo: None,
            payment_account: Some(AccountId::from("35")),
            lines: vec![PostingLine {
                amount: Money::from_cents(5000),
                account: AccountId::from("63"),
                description: "Mulch - Qty: 4 @$12.50".into(),
                customer: Some(EntityRef {
                    id: EntityId::from("58"),
                    name: "Smith Residence".into(),
                }),
            }],
        }
    }

    #[test]
    fn bill_payload() {
        let body = transaction_payload(&transaction(TransactionKind::Bill));
        assert_eq!(body["VendorRef"]["value"], "56");
        assert_eq!(body["TxnDate"], "2025-03-15");
        assert_eq!(body["DocNumber"], "INV-1042");
        assert!(body.get("DueDate").is_none());
        assert!(body.get("AccountRef").is_none());
        let line = &body["Line"][0];
        assert_eq!(line["Amount"], 50.0);
        assert_eq!(line["AccountBasedExpenseLineDetail"]["AccountRef"]["value"], "63");
        assert_eq!(line["AccountBasedExpenseLineDetail"]["CustomerRef"]["value"], "58");
    }

    #[test]
    fn purchase_payload() {
        let body = transaction_payload(&transaction(TransactionKind::Purchase));
        assert_eq!(body["PaymentType"], "CreditCard");
        assert_eq!(body["AccountRef"]["value"], "35");
        assert_eq!(body["EntityRef"]["type"], "Vendor");
        assert!(body.get("VendorRef").is_none());
    }

    #[test]
    fn vendor_and_attachable_payloads() {
        let vendor = vendor_payload(&NewEntity {
            display_name: "Acme".into(),
            company_name: Some("Acme LLC".into()),
        });
        assert_eq!(vendor, json!({"DisplayName": "Acme", "CompanyName": "Acme LLC"}));

        let meta = attachable_metadata(
            TransactionKind::Purchase,
            &TransactionId::from("9"),
            &Attachment::new("receipt.png", vec![]),
        );
        assert_eq!(meta["AttachableRef"][0]["EntityRef"]["type"], "Purchase");
        assert_eq!(meta["ContentType"], "image/png");
    }

    #[test]
    fn fault_message_is_extracted() {
        let body = json!({"Fault": {"Error": [{
            "Message": "Duplicate Name Exists Error",
            "Detail": "The name supplied already exists."
        }]}});
        assert_eq!(extract_qbo_error(&body, 400), "The name supplied already exists.");
        assert_eq!(extract_qbo_error(&Value::Null, 500), "HTTP 500");
        assert_eq!(base_url(true), QBO_SANDBOX_BASE);
    }
}
