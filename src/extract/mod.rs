//! Decoding request data into typed targets, followed by validation.
//!
//! [`extract_request`] reads query and path parameters through a [`Schema`];
//! [`extract_json_request`] reads the JSON body. Both overwrite the target
//! once decoding succeeds, then hand it to the [`Validator`], so the decoded
//! fields remain available even when validation fails.

mod schema;

use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::request::Request;
use crate::validate::{FieldErrors, Validator, View};

pub use schema::{Field, Kind, Schema, SchemaBuilder, SchemaError};

/// Key under which failures not tied to one field are reported.
pub const GLOBAL_ERROR_KEY: &str = "_global";

/// Query parameters in order, followed by the router's path variables.
///
/// A path variable named like a query parameter is appended, never replacing
/// the query values.
pub fn request_params(req: &Request) -> Result<Vec<(String, String)>, FieldErrors> {
    let mut params = Vec::new();

    for pair in req.query().unwrap_or_default().split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.push((decode_component(key)?, decode_component(value)?));
    }

    params.extend(req.params().iter().cloned());
    Ok(params)
}

fn decode_component(raw: &str) -> Result<String, FieldErrors> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|err| global(format!("invalid query string: {err}")))
}

fn global(message: String) -> FieldErrors {
    let mut errors = FieldErrors::new();
    errors.add(GLOBAL_ERROR_KEY, message);
    errors
}

/// Decodes query and path parameters into `target`, then validates it.
///
/// Decode failures are returned without running the validator. Validation
/// failures leave `target` holding the decoded values.
pub fn extract_request<T>(
    req: &Request,
    target: &mut T,
    schema: &Schema,
    validator: &dyn Validator,
) -> Result<(), Error>
where
    T: Serialize + DeserializeOwned,
{
    let params = request_params(req).map_err(Error::RequestValidation)?;

    let object = schema.decode(&params).map_err(|errors| {
        tracing::debug!(parent: req.span(), ?errors, "request parameters failed to decode");
        Error::RequestValidation(errors)
    })?;

    *target = serde_json::from_value(Value::Object(object)).map_err(|err| {
        tracing::info!(parent: req.span(), error = %err, "decoded parameters do not fit target");
        Error::RequestValidation(global(err.to_string()))
    })?;

    validate(req, target, schema.aliases(), validator)
}

/// Decodes the JSON body into `target`, then validates it.
///
/// An absent or empty body is [`Error::MissingBody`], a body that does not
/// parse is [`Error::InvalidJson`]. Neither runs the validator.
pub fn extract_json_request<T>(
    req: &Request,
    target: &mut T,
    validator: &dyn Validator,
) -> Result<(), Error>
where
    T: Serialize + DeserializeOwned,
{
    let body = req.body().ok_or(Error::MissingBody)?;
    *target = serde_json::from_slice(body).map_err(Error::InvalidJson)?;

    validate(req, target, &[], validator)
}

fn validate<T: Serialize>(
    req: &Request,
    target: &T,
    aliases: &[(String, String)],
    validator: &dyn Validator,
) -> Result<(), Error> {
    let value = serde_json::to_value(target)
        .map_err(|err| Error::internal(format!("serializing request target: {err}")))?;

    let errors = validator.validate(req, &View::with_aliases(&value, aliases));
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::RequestValidation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{NoValidation, RuleValidator, Rules};
    use bytes::Bytes;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Counting {
        fn calls(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl Validator for Counting {
        fn validate(&self, _req: &Request, _data: &View<'_>) -> FieldErrors {
            self.0.fetch_add(1, Ordering::SeqCst);
            FieldErrors::new()
        }
    }

    fn get(uri: &str) -> Request {
        Request::new(http::Request::builder().uri(uri).body(Bytes::new()).unwrap())
    }

    fn post(body: &'static str) -> Request {
        Request::new(
            http::Request::builder()
                .method("POST")
                .uri("/")
                .body(Bytes::from_static(body.as_bytes()))
                .unwrap(),
        )
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Info {
        prefix: String,
        count: i64,
        json: bool,
    }

    fn info_schema() -> Schema {
        Schema::builder()
            .field(Field::string("prefix"))
            .field(Field::int("count"))
            .field(Field::bool("json"))
            .build()
            .unwrap()
    }

    fn info_rules() -> Rules {
        Rules::new()
            .field("prefix", ["required"])
            .unwrap()
            .field("count", ["min:4"])
            .unwrap()
    }

    #[test]
    fn query_validation_failure_keeps_decoded_target() {
        let req = get("/?prefix=p&count=1&json=true");
        let mut info = Info::default();

        let err = extract_request(&req, &mut info, &info_schema(), &RuleValidator::new(info_rules()))
            .unwrap_err();

        let errors = err.field_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.get("count"),
            Some(&["The count field value can not be less than 4".to_owned()][..])
        );
        assert_eq!(
            info,
            Info {
                prefix: "p".into(),
                count: 1,
                json: true
            }
        );
    }

    #[test]
    fn json_tag_on_query_extraction() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Prefix {
            prefix: String,
        }

        let schema = Schema::builder().field(Field::string("prefix")).build().unwrap();
        let validator = RuleValidator::json(Rules::new().field("prefix", ["required"]).unwrap());
        let mut target = Prefix::default();

        let err = extract_request(&get("/"), &mut target, &schema, &validator).unwrap_err();
        assert_eq!(
            err.field_errors().and_then(|e| e.get("prefix")),
            Some(&["The prefix field is required".to_owned()][..])
        );
        assert_eq!(target.prefix, "");
    }

    #[test]
    fn schema_tag_resolves_renamed_fields() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Lookup {
            user_id: String,
        }

        let schema = Schema::builder()
            .field(Field::string("user").rename("user_id"))
            .build()
            .unwrap();
        let validator = RuleValidator::new(Rules::new().field("user", ["alpha_num"]).unwrap());
        let mut target = Lookup::default();

        let err = extract_request(&get("/?user=a-b"), &mut target, &schema, &validator).unwrap_err();
        assert!(err.field_errors().unwrap().get("user").is_some());
        assert_eq!(target.user_id, "a-b");
    }

    #[test]
    fn path_variables_append_to_query_values() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Ids {
            id: Vec<String>,
        }

        let req = get("/items/9?id=1&id=2").with_params([("id", "9")]);
        let schema = Schema::builder().field(Field::string("id").repeated()).build().unwrap();
        let mut ids = Ids::default();

        extract_request(&req, &mut ids, &schema, &NoValidation).unwrap();
        assert_eq!(ids.id, ["1", "2", "9"]);
    }

    #[test]
    fn decodes_durations_and_escapes() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Poll {
            name: String,
            every: Duration,
        }

        let schema = Schema::builder()
            .field(Field::string("name"))
            .field(Field::duration("every"))
            .build()
            .unwrap();
        let mut poll = Poll::default();

        extract_request(&get("/?name=a+b%21&every=1h30m"), &mut poll, &schema, &NoValidation).unwrap();
        assert_eq!(poll.name, "a b!");
        assert_eq!(poll.every, Duration::from_secs(5_400));
    }

    #[test]
    fn decode_failures_skip_validation() {
        let req = get("/?count=many&prefix=");
        let mut info = Info::default();

        let err = extract_request(&req, &mut info, &info_schema(), &RuleValidator::new(info_rules()))
            .unwrap_err();

        let errors = err.field_errors().unwrap();
        assert_eq!(
            errors.get("count"),
            Some(&["Unable to convert value to expected type i64".to_owned()][..])
        );
        assert!(errors.get("prefix").is_none());
        assert_eq!(info, Info::default());
    }

    #[test]
    fn invalid_utf8_query_is_global() {
        let mut info = Info::default();
        let err = extract_request(&get("/?prefix=%ff"), &mut info, &info_schema(), &NoValidation)
            .unwrap_err();
        assert!(err.field_errors().unwrap().get(GLOBAL_ERROR_KEY).is_some());
    }

    #[test]
    fn json_validation_failure_keeps_decoded_target() {
        let req = post(r#"{"prefix":"p","count":1,"json":true}"#);
        let mut info = Info::default();

        let err = extract_json_request(&req, &mut info, &RuleValidator::json(info_rules())).unwrap_err();

        assert_eq!(
            err.field_errors().and_then(|e| e.get("count")),
            Some(&["The count field value can not be less than 4".to_owned()][..])
        );
        assert_eq!(info.count, 1);
        assert!(info.json);
    }

    #[test]
    fn validator_runs_only_after_decoding() {
        let counting = Counting::default();
        let mut info = Info::default();

        let err = extract_json_request(&get("/"), &mut info, &counting).unwrap_err();
        assert!(matches!(err, Error::MissingBody));
        let err = extract_json_request(&post("{"), &mut info, &counting).unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));
        let err = extract_request(&get("/?count=many"), &mut info, &info_schema(), &counting)
            .unwrap_err();
        assert!(err.field_errors().unwrap().get("count").is_some());
        let err = extract_request(&get("/?prefix=%ff"), &mut info, &info_schema(), &counting)
            .unwrap_err();
        assert!(err.field_errors().unwrap().get(GLOBAL_ERROR_KEY).is_some());
        assert_eq!(counting.calls(), 0);

        extract_request(&get("/?count=5"), &mut info, &info_schema(), &counting).unwrap();
        extract_json_request(&post(r#"{"prefix":"p","count":5,"json":false}"#), &mut info, &counting)
            .unwrap();
        assert_eq!(counting.calls(), 2);
    }

    #[test]
    fn missing_required_field_is_the_only_error() {
        let req = get("/?count=5&json=true");
        let mut info = Info::default();

        let err = extract_request(&req, &mut info, &info_schema(), &RuleValidator::new(info_rules()))
            .unwrap_err();

        let errors = err.field_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.get("prefix"),
            Some(&["The prefix field is required".to_owned()][..])
        );
        assert_eq!(
            info,
            Info {
                prefix: String::new(),
                count: 5,
                json: true
            }
        );
    }

    #[test]
    fn json_missing_and_invalid_bodies() {
        let mut info = Info::default();

        let err = extract_json_request(&get("/"), &mut info, &NoValidation).unwrap_err();
        assert!(matches!(err, Error::MissingBody));

        let err = extract_json_request(&post("{"), &mut info, &NoValidation).unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));
    }
}
