use serde_json::{json, Value};

use common::{
    BuyReceipt, ContractStatus, ContractUpdate, Error, Proposal, ProposalRequest, RawTick, Result,
};

// ─── Outbound requests ───────────────────────────────────────────────────────
//
// The client stamps every request with a `req_id` before sending.

pub fn authorize(token: &str) -> Value {
    json!({ "authorize": token })
}

pub fn ticks(symbol: &str) -> Value {
    json!({ "ticks": symbol, "subscribe": 1 })
}

/// The API caps a single history request at this many ticks.
pub const MAX_HISTORY_COUNT: usize = 5000;

pub fn ticks_history(symbol: &str, count: usize) -> Value {
    json!({
        "ticks_history": symbol,
        "count": count.clamp(1, MAX_HISTORY_COUNT),
        "end": "latest",
        "style": "ticks",
    })
}

pub fn proposal(request: &ProposalRequest) -> Value {
    let mut msg = json!({
        "proposal": 1,
        "amount": request.amount,
        "basis": request.basis,
        "contract_type": request.contract_type.as_str(),
        "currency": request.currency,
        "duration": request.duration,
        "duration_unit": request.duration_unit,
        "symbol": request.symbol,
    });
    if let Some(barrier) = &request.barrier {
        msg["barrier"] = json!(barrier);
    }
    msg
}

pub fn buy(proposal_id: &str, price: f64) -> Value {
    json!({ "buy": proposal_id, "price": price })
}

pub fn open_contract(contract_id: &str) -> Value {
    // The API expects a numeric contract id; fall back to the raw string.
    let id = contract_id
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(contract_id));
    json!({ "proposal_open_contract": 1, "contract_id": id, "subscribe": 1 })
}

pub fn forget(subscription_id: &str) -> Value {
    json!({ "forget": subscription_id })
}

pub fn ping() -> Value {
    json!({ "ping": 1 })
}

// ─── Inbound parsing ─────────────────────────────────────────────────────────

pub fn req_id(msg: &Value) -> Option<u64> {
    msg.get("req_id").and_then(Value::as_u64)
}

pub fn msg_type(msg: &Value) -> Option<&str> {
    msg.get("msg_type").and_then(Value::as_str)
}

pub fn subscription_id(msg: &Value) -> Option<String> {
    msg.get("subscription")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The broker's application-level error, if the message carries one.
pub fn broker_error(msg: &Value) -> Option<Error> {
    let err = msg.get("error")?;
    Some(Error::Broker {
        code: err
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("UnknownError")
            .to_string(),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    })
}

pub fn parse_tick(msg: &Value) -> Option<RawTick> {
    let tick = msg.get("tick")?;
    Some(RawTick {
        symbol: tick.get("symbol")?.as_str()?.to_string(),
        epoch: tick.get("epoch").and_then(Value::as_i64).unwrap_or_default(),
        quote: number(tick.get("quote")?)?,
    })
}

/// `history.prices` and `history.times` are parallel arrays, oldest first.
pub fn parse_history(symbol: &str, msg: &Value) -> Result<Vec<RawTick>> {
    let history = msg
        .get("history")
        .ok_or_else(|| Error::Connection("ticks_history response has no history".into()))?;
    let prices = history
        .get("prices")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let times = history
        .get("times")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    Ok(prices
        .iter()
        .zip(times)
        .filter_map(|(price, time)| {
            Some(RawTick {
                symbol: symbol.to_string(),
                epoch: time.as_i64()?,
                quote: number(price)?,
            })
        })
        .collect())
}

pub fn parse_proposal(msg: &Value) -> Result<Proposal> {
    let p = msg
        .get("proposal")
        .ok_or_else(|| Error::Proposal("response has no proposal body".into()))?;
    let id = p
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Proposal("proposal has no id".into()))?;
    Ok(Proposal {
        id: id.to_string(),
        ask_price: p
            .get("ask_price")
            .and_then(number)
            .ok_or_else(|| Error::Proposal("proposal has no ask_price".into()))?,
        payout: p.get("payout").and_then(number).unwrap_or_default(),
    })
}

pub fn parse_buy(msg: &Value) -> Result<BuyReceipt> {
    let b = msg
        .get("buy")
        .ok_or_else(|| Error::Buy("response has no buy body".into()))?;
    let contract_id = b
        .get("contract_id")
        .and_then(id_string)
        .ok_or_else(|| Error::Buy("buy response has no contract_id".into()))?;
    Ok(BuyReceipt {
        contract_id,
        buy_price: b.get("buy_price").and_then(number).unwrap_or_default(),
    })
}

pub fn parse_open_contract(msg: &Value) -> Option<ContractUpdate> {
    let poc = msg.get("proposal_open_contract")?;
    let contract_id = poc.get("contract_id").and_then(id_string)?;
    let status = match poc.get("status").and_then(Value::as_str) {
        Some("won") => ContractStatus::Won,
        Some("lost") => ContractStatus::Lost,
        Some("sold") => ContractStatus::Sold,
        _ => ContractStatus::Open,
    };
    Some(ContractUpdate {
        contract_id,
        status,
        profit: poc.get("profit").and_then(number),
        exit_tick: poc.get("exit_tick").and_then(number),
    })
}

/// Contract ids arrive as numbers or strings depending on the call.
fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Prices are usually numbers but some fields are sent as strings.
fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ContractSignal, ContractType};

    #[test]
    fn proposal_request_shape() {
        let signal = ContractSignal::new(ContractType::DigitOver, Some(3));
        let req = ProposalRequest::stake_in_ticks(2.5, &signal, 1, "R_100");
        let msg = proposal(&req);
        assert_eq!(msg["proposal"], 1);
        assert_eq!(msg["amount"], 2.5);
        assert_eq!(msg["basis"], "stake");
        assert_eq!(msg["contract_type"], "DIGITOVER");
        assert_eq!(msg["currency"], "USD");
        assert_eq!(msg["duration"], 1);
        assert_eq!(msg["duration_unit"], "t");
        assert_eq!(msg["symbol"], "R_100");
        assert_eq!(msg["barrier"], "3");
    }

    #[test]
    fn parity_proposal_has_no_barrier() {
        let signal = ContractSignal::new(ContractType::DigitEven, None);
        let req = ProposalRequest::stake_in_ticks(1.0, &signal, 5, "R_50");
        assert!(proposal(&req).get("barrier").is_none());
    }

    #[test]
    fn parses_tick_with_subscription() {
        let msg: Value = serde_json::from_str(
            r#"{"echo_req":{"ticks":"R_100"},"msg_type":"tick","req_id":3,
                "subscription":{"id":"abc-123"},
                "tick":{"ask":1234.57,"bid":1234.55,"epoch":1700000000,"id":"abc-123","pip_size":2,"quote":1234.56,"symbol":"R_100"}}"#,
        )
        .unwrap();
        let tick = parse_tick(&msg).unwrap();
        assert_eq!(tick.symbol, "R_100");
        assert_eq!(tick.epoch, 1_700_000_000);
        assert_eq!(tick.quote, 1234.56);
        assert_eq!(subscription_id(&msg).as_deref(), Some("abc-123"));
        assert_eq!(req_id(&msg), Some(3));
        assert_eq!(msg_type(&msg), Some("tick"));
    }

    #[test]
    fn history_request_is_capped() {
        let msg = ticks_history("R_100", 120);
        assert_eq!(msg["ticks_history"], "R_100");
        assert_eq!(msg["count"], 120);
        assert_eq!(msg["end"], "latest");
        assert_eq!(msg["style"], "ticks");
        assert_eq!(ticks_history("R_100", 9000)["count"], 5000);
    }

    #[test]
    fn parses_history_oldest_first() {
        let msg = json!({
            "msg_type": "history",
            "history": {
                "prices": [1234.5, "1234.61", 1234.7],
                "times": [1700000000, 1700000002, 1700000004]
            }
        });
        let ticks = parse_history("R_100", &msg).unwrap();
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].epoch, 1_700_000_000);
        assert_eq!(ticks[1].quote, 1234.61);
        assert!(ticks.iter().all(|t| t.symbol == "R_100"));

        assert!(parse_history("R_100", &json!({ "msg_type": "history" })).is_err());
    }

    #[test]
    fn parses_buy_with_numeric_contract_id() {
        let msg: Value = serde_json::from_str(
            r#"{"buy":{"buy_price":1,"contract_id":231234567890,"payout":1.95},"msg_type":"buy","req_id":7}"#,
        )
        .unwrap();
        let receipt = parse_buy(&msg).unwrap();
        assert_eq!(receipt.contract_id, "231234567890");
        assert_eq!(receipt.buy_price, 1.0);
    }

    #[test]
    fn parses_proposal_with_string_prices() {
        let msg: Value = serde_json::from_str(
            r#"{"proposal":{"id":"p-1","ask_price":"2.50","payout":"4.88"},"msg_type":"proposal"}"#,
        )
        .unwrap();
        let p = parse_proposal(&msg).unwrap();
        assert_eq!(p.id, "p-1");
        assert_eq!(p.ask_price, 2.5);
        assert_eq!(p.payout, 4.88);
    }

    #[test]
    fn proposal_without_id_is_an_error() {
        let msg = json!({ "proposal": { "ask_price": 1.0 } });
        assert!(matches!(parse_proposal(&msg), Err(Error::Proposal(_))));
    }

    #[test]
    fn parses_settled_contract() {
        let msg = json!({
            "msg_type": "proposal_open_contract",
            "proposal_open_contract": {
                "contract_id": 42,
                "status": "lost",
                "profit": -1.0,
                "exit_tick": "1234.57"
            }
        });
        let update = parse_open_contract(&msg).unwrap();
        assert_eq!(update.contract_id, "42");
        assert_eq!(update.status, ContractStatus::Lost);
        assert_eq!(update.profit, Some(-1.0));
        assert_eq!(update.exit_tick, Some(1234.57));
    }

    #[test]
    fn open_contract_request_uses_numeric_id() {
        assert_eq!(open_contract("42")["contract_id"], 42);
        assert_eq!(open_contract("x-1")["contract_id"], "x-1");
    }

    #[test]
    fn extracts_broker_error() {
        let msg = json!({
            "error": { "code": "InvalidToken", "message": "The token is invalid." },
            "msg_type": "authorize",
            "req_id": 1
        });
        match broker_error(&msg) {
            Some(Error::Broker { code, message }) => {
                assert_eq!(code, "InvalidToken");
                assert_eq!(message, "The token is invalid.");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(broker_error(&json!({"ping": "pong"})).is_none());
    }
}
