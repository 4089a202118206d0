//! Conversion between XMPP stanzas and session-core types.

use session_core::{
    ContactId, InboundStanza, OutgoingChat, SessionError, SessionErrorCategory,
    StanzaErrorDetail, StanzaKind,
};
use xmpp_parsers::{
    Element,
    iq::{Iq, IqType},
    message::{Message, MessageType},
    ns,
    presence::Presence,
    roster::Roster,
    stanza_error::{DefinedCondition, ErrorType, StanzaError},
};

pub(crate) const CLIENT_NS: &str = ns::JABBER_CLIENT;
const UNDEFINED_CONDITION: &str = "undefined-condition";

/// Build a chat-typed `<message/>` for the given recipient.
///
/// The recipient is written as typed; the server validates the address.
pub fn chat_message(message: &OutgoingChat, id: &str) -> Element {
    Element::builder("message", CLIENT_NS)
        .attr("type", "chat")
        .attr("to", message.to.as_str())
        .attr("id", id)
        .append(
            Element::builder("body", CLIENT_NS)
                .append(message.body.clone())
                .build(),
        )
        .build()
}

/// Initial available presence so the server routes messages to us.
pub fn available_presence() -> Element {
    Presence::available().into()
}

/// Roster `get` request.
pub fn roster_query(id: &str) -> Element {
    Iq::from_get(
        id,
        Roster {
            ver: None,
            items: Vec::new(),
        },
    )
    .into()
}

/// Parse a user-supplied payload into one stanza element.
///
/// The payload is parsed inside a `jabber:client` wrapper so that stanzas
/// typed without an `xmlns` still land in the client namespace.
pub fn parse_raw_payload(payload: &str) -> Result<Element, SessionError> {
    let wrapped = format!("<raw xmlns='{CLIENT_NS}'>{payload}</raw>");
    let wrapper: Element = wrapped.parse().map_err(|err| invalid_raw_payload(format!("{err}")))?;

    let mut children = wrapper.children();
    match (children.next(), children.next()) {
        (Some(stanza), None) => Ok(stanza.clone()),
        (None, _) => Err(invalid_raw_payload("payload contains no element")),
        (Some(_), Some(_)) => Err(invalid_raw_payload(
            "payload must contain exactly one element",
        )),
    }
}

/// Convert a received `<message/>` into the transport-neutral view.
///
/// Returns `None` for anything that is not a well-formed message stanza.
pub fn parse_message(element: &Element) -> Option<InboundStanza> {
    if !element.is("message", CLIENT_NS) {
        return None;
    }
    let message = Message::try_from(element.clone()).ok()?;

    let kind = match message.type_ {
        MessageType::Chat => StanzaKind::Chat,
        MessageType::Error => StanzaKind::Error,
        MessageType::Groupchat => StanzaKind::Groupchat,
        MessageType::Headline => StanzaKind::Headline,
        MessageType::Normal => StanzaKind::Normal,
    };
    let body = message
        .get_best_body(Vec::new())
        .map(|(_lang, body)| body.0.clone());
    let error = message
        .payloads
        .iter()
        .find(|payload| payload.is("error", CLIENT_NS))
        .map(parse_stanza_error);

    Some(InboundStanza {
        kind,
        from: message
            .from
            .map(|from| ContactId::from(from.to_bare().to_string())),
        body,
        error,
    })
}

/// Extract contact addresses from a roster result, preserving server order.
pub fn parse_roster_result(element: &Element) -> Result<Vec<ContactId>, SessionError> {
    let iq = Iq::try_from(element.clone()).map_err(|err| {
        SessionError::roster_query_failed(format!("malformed roster response: {err}"))
    })?;

    match iq.payload {
        IqType::Result(None) => Ok(Vec::new()),
        IqType::Result(Some(payload)) => {
            let roster = Roster::try_from(payload).map_err(|err| {
                SessionError::roster_query_failed(format!("malformed roster: {err}"))
            })?;
            Ok(roster
                .items
                .into_iter()
                .map(|item| ContactId::from(item.jid.to_string()))
                .collect())
        }
        IqType::Error(error) => {
            let detail = error_detail(&error, None);
            Err(SessionError::roster_query_failed(format!(
                "server rejected roster query: {} {}",
                detail.code, detail.reason
            )))
        }
        IqType::Get(_) | IqType::Set(_) => Err(SessionError::roster_query_failed(
            "unexpected request in place of a roster response",
        )),
    }
}

/// Answer for an inbound `get`/`set` the client does not otherwise serve.
///
/// Pings and roster pushes are acknowledged with an empty result, every other
/// request gets `service-unavailable`. Results and errors get no answer.
pub fn unhandled_iq_reply(iq: &Iq) -> Option<Element> {
    let payload = match &iq.payload {
        IqType::Get(payload) | IqType::Set(payload) => payload,
        IqType::Result(_) | IqType::Error(_) => return None,
    };
    let acknowledged = match &iq.payload {
        IqType::Get(_) => payload.is("ping", ns::PING),
        _ => payload.is("query", ns::ROSTER),
    };

    let reply = if acknowledged {
        IqType::Result(None)
    } else {
        IqType::Error(StanzaError::new(
            ErrorType::Cancel,
            DefinedCondition::ServiceUnavailable,
            "en",
            "request not supported by this client",
        ))
    };
    Some(
        Iq {
            from: None,
            to: iq.from.clone(),
            id: iq.id.clone(),
            payload: reply,
        }
        .into(),
    )
}

/// Read an `<error/>` element, honouring a legacy numeric `code` attribute.
fn parse_stanza_error(error: &Element) -> StanzaErrorDetail {
    let legacy_code = error
        .attr("code")
        .and_then(|value| value.trim().parse::<u16>().ok());

    match StanzaError::try_from(without_legacy_code(error)) {
        Ok(parsed) => error_detail(&parsed, legacy_code),
        Err(_) => {
            let text = error.text();
            let text = text.trim();
            StanzaErrorDetail {
                code: legacy_code.unwrap_or(500),
                reason: if text.is_empty() {
                    UNDEFINED_CONDITION.to_owned()
                } else {
                    text.to_owned()
                },
            }
        }
    }
}

fn error_detail(error: &StanzaError, legacy_code: Option<u16>) -> StanzaErrorDetail {
    let condition = condition_name(&error.defined_condition);
    let reason = error
        .texts
        .values()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .map_or(condition, str::to_owned);

    StanzaErrorDetail {
        code: legacy_code.unwrap_or_else(|| legacy_error_code(&error.defined_condition)),
        reason,
    }
}

fn condition_name(condition: &DefinedCondition) -> String {
    Element::from(condition.clone()).name().to_owned()
}

/// `StanzaError` rejects unknown attributes, so the legacy `code` is dropped
/// before typed parsing.
fn without_legacy_code(error: &Element) -> Element {
    let mut builder = Element::builder(error.name(), error.ns());
    for (name, value) in error.attrs().filter(|(name, _)| *name != "code") {
        builder = builder.attr(name, value);
    }
    builder.append_all(error.children().cloned()).build()
}

/// Map RFC 6120 defined conditions to legacy numeric codes (XEP-0086).
fn legacy_error_code(condition: &DefinedCondition) -> u16 {
    match condition {
        DefinedCondition::BadRequest | DefinedCondition::JidMalformed => 400,
        DefinedCondition::NotAuthorized => 401,
        DefinedCondition::Forbidden => 403,
        DefinedCondition::ItemNotFound
        | DefinedCondition::RecipientUnavailable
        | DefinedCondition::RemoteServerNotFound => 404,
        DefinedCondition::NotAllowed => 405,
        DefinedCondition::NotAcceptable | DefinedCondition::PolicyViolation => 406,
        DefinedCondition::RegistrationRequired | DefinedCondition::SubscriptionRequired => 407,
        DefinedCondition::Conflict => 409,
        DefinedCondition::FeatureNotImplemented => 501,
        DefinedCondition::ServiceUnavailable => 503,
        DefinedCondition::RemoteServerTimeout => 504,
        DefinedCondition::Redirect | DefinedCondition::Gone => 302,
        DefinedCondition::InternalServerError
        | DefinedCondition::ResourceConstraint
        | DefinedCondition::UndefinedCondition
        | DefinedCondition::UnexpectedRequest => 500,
    }
}

fn invalid_raw_payload(message: impl Into<String>) -> SessionError {
    SessionError::new(
        SessionErrorCategory::Application,
        "invalid_raw_payload",
        message,
    )
}
