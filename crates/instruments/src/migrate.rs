//! Schema migrations for instrument events.
//!
//! The `instrument.created` payload went through three revisions:
//!
//! * v1 -> v2: events predate timestamp tracking; `occurred_at` is
//!   backfilled from the migration context.
//! * v2 -> v3: display names used to echo raw pasted input and could leak
//!   full card numbers; digit runs of 12 or more are stripped from `name`.
//! * v3 -> v4: the loose top-level `scheme`/`reference` pair is folded into
//!   the nested `resource { kind, fields }` shape.
//!
//! Every step is a pure payload transform; events of other types pass
//! through untouched.

use serde_json::{Map, Value, json};

use crate::instrument::Instrument;
use paycore_events::{CreatableEntity, MigrationChain, MigrationError, MigrationStep};

/// Migration chain for the instrument aggregate's own events.
pub fn chain() -> MigrationChain {
    MigrationChain::new(
        <Instrument as CreatableEntity>::SCHEMA_VERSION,
        vec![
            MigrationStep::new(1, |event_type, mut payload, ctx| {
                if event_type != "instrument.created" {
                    return Ok(payload);
                }
                let inner = created_object(&mut payload)?;
                if !inner.contains_key("occurred_at") {
                    let fallback = serde_json::to_value(ctx.created_fallback)
                        .map_err(|e| MigrationError::Payload(e.to_string()))?;
                    inner.insert("occurred_at".to_string(), fallback);
                }
                Ok(payload)
            }),
            MigrationStep::new(2, |event_type, mut payload, _ctx| {
                if event_type != "instrument.created" {
                    return Ok(payload);
                }
                let inner = created_object(&mut payload)?;
                if let Some(Value::String(name)) = inner.get("name") {
                    let scrubbed = scrub_long_digit_runs(name);
                    inner.insert("name".to_string(), Value::String(scrubbed));
                }
                Ok(payload)
            }),
            MigrationStep::new(3, |event_type, mut payload, _ctx| {
                if event_type != "instrument.created" {
                    return Ok(payload);
                }
                let inner = created_object(&mut payload)?;
                if inner.contains_key("resource") {
                    return Ok(payload);
                }
                let kind = match inner.remove("scheme") {
                    Some(Value::String(s)) if !s.is_empty() => s,
                    _ => "unknown".to_string(),
                };
                let mut fields = Map::new();
                if let Some(Value::String(reference)) = inner.remove("reference") {
                    fields.insert("reference".to_string(), Value::String(reference));
                }
                inner.insert(
                    "resource".to_string(),
                    json!({ "kind": kind, "fields": fields }),
                );
                Ok(payload)
            }),
        ],
    )
}

fn created_object(payload: &mut Value) -> Result<&mut Map<String, Value>, MigrationError> {
    payload
        .get_mut("Created")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            MigrationError::Payload(
                "instrument.created payload is not a Created object".to_string(),
            )
        })
}

/// Removes ASCII digit runs of length 12 or more, keeping everything else
/// in place: `"card 123456789012 ok"` becomes `"card  ok"`.
fn scrub_long_digit_runs(input: &str) -> String {
    const MIN_RUN: usize = 12;
    let mut out = String::with_capacity(input.len());
    let mut run = String::new();
    for ch in input.chars() {
        if ch.is_ascii_digit() {
            run.push(ch);
        } else {
            if !run.is_empty() && run.len() < MIN_RUN {
                out.push_str(&run);
            }
            run.clear();
            out.push(ch);
        }
    }
    if !run.is_empty() && run.len() < MIN_RUN {
        out.push_str(&run);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentEvent, InstrumentId};
    use chrono::Utc;
    use paycore_core::EntityId;
    use paycore_core::PartyId;
    use paycore_events::MigrationContext;

    fn ctx() -> MigrationContext {
        MigrationContext {
            created_fallback: Utc::now(),
        }
    }

    #[test]
    fn chain_is_gap_free() {
        chain().verify().unwrap();
        assert_eq!(
            chain().current_version(),
            <Instrument as CreatableEntity>::SCHEMA_VERSION
        );
    }

    #[test]
    fn scrub_strips_only_long_runs() {
        assert_eq!(
            scrub_long_digit_runs("card 123456789012 ok"),
            "card  ok"
        );
        assert_eq!(scrub_long_digit_runs("acct 1234"), "acct 1234");
        assert_eq!(
            scrub_long_digit_runs("12345678901234567890"),
            ""
        );
        assert_eq!(
            scrub_long_digit_runs("a123456789012b12345678901c"),
            "ab12345678901c"
        );
        assert_eq!(scrub_long_digit_runs(""), "");
    }

    #[test]
    fn v1_event_lifts_all_the_way_to_current() {
        let migration_ctx = ctx();
        let instrument_id = InstrumentId::new(EntityId::new());
        let owner = PartyId::new();
        let identity = EntityId::new();

        // v1 shape: no occurred_at, unscrubbed name, loose scheme/reference.
        let legacy = json!({
            "Created": {
                "instrument_id": instrument_id,
                "owner": owner,
                "name": "card 4111111111111111 personal",
                "identity": identity,
                "currency": "USD",
                "scheme": "visa",
                "reference": "tok_4xk2",
                "external_id": null,
                "metadata": {},
            }
        });

        let lifted = chain()
            .migrate("instrument.created", 1, legacy, &migration_ctx)
            .unwrap();
        let event: InstrumentEvent = serde_json::from_value(lifted).unwrap();
        match event {
            InstrumentEvent::Created(e) => {
                assert_eq!(e.occurred_at, migration_ctx.created_fallback);
                assert_eq!(e.name, "card  personal");
                assert_eq!(e.resource.kind, "visa");
                assert_eq!(
                    e.resource.fields.get("reference").map(String::as_str),
                    Some("tok_4xk2")
                );
            }
            _ => panic!("Expected Created event after migration"),
        }
    }

    #[test]
    fn v3_event_only_restructures_resource() {
        let migration_ctx = ctx();
        let occurred_at = Utc::now();
        let legacy = json!({
            "Created": {
                "instrument_id": InstrumentId::new(EntityId::new()),
                "owner": PartyId::new(),
                "name": "Corporate card",
                "identity": EntityId::new(),
                "currency": "EUR",
                "scheme": "sepa",
                "external_id": null,
                "metadata": {},
                "occurred_at": occurred_at,
            }
        });

        let lifted = chain()
            .migrate("instrument.created", 3, legacy, &migration_ctx)
            .unwrap();
        let event: InstrumentEvent = serde_json::from_value(lifted).unwrap();
        match event {
            InstrumentEvent::Created(e) => {
                assert_eq!(e.occurred_at, occurred_at);
                assert_eq!(e.name, "Corporate card");
                assert_eq!(e.resource.kind, "sepa");
                assert!(e.resource.fields.is_empty());
            }
            _ => panic!("Expected Created event after migration"),
        }
    }

    #[test]
    fn missing_scheme_maps_to_unknown_kind() {
        let legacy = json!({
            "Created": {
                "instrument_id": InstrumentId::new(EntityId::new()),
                "owner": PartyId::new(),
                "name": "Legacy token",
                "identity": EntityId::new(),
                "currency": "USD",
                "external_id": null,
                "metadata": {},
                "occurred_at": Utc::now(),
            }
        });

        let lifted = chain()
            .migrate("instrument.created", 3, legacy, &ctx())
            .unwrap();
        let event: InstrumentEvent = serde_json::from_value(lifted).unwrap();
        match event {
            InstrumentEvent::Created(e) => assert_eq!(e.resource.kind, "unknown"),
            _ => panic!("Expected Created event after migration"),
        }
    }

    #[test]
    fn current_version_payload_is_untouched() {
        let migration_ctx = ctx();
        let occurred_at = Utc::now();
        let payload = json!({
            "Created": {
                "instrument_id": InstrumentId::new(EntityId::new()),
                "owner": PartyId::new(),
                "name": "Corporate card",
                "identity": EntityId::new(),
                "currency": "USD",
                "resource": { "kind": "visa", "fields": {} },
                "external_id": null,
                "metadata": {},
                "occurred_at": occurred_at,
            }
        });

        let lifted = chain()
            .migrate(
                "instrument.created",
                <Instrument as CreatableEntity>::SCHEMA_VERSION,
                payload.clone(),
                &migration_ctx,
            )
            .unwrap();
        assert_eq!(lifted, payload);
    }

    #[test]
    fn status_events_pass_through_every_step() {
        let payload = json!({
            "StatusChanged": { "status": "authorized", "occurred_at": Utc::now() }
        });
        let lifted = chain()
            .migrate("instrument.status_changed", 1, payload.clone(), &ctx())
            .unwrap();
        assert_eq!(lifted, payload);
    }
}
