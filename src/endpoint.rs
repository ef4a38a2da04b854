//! Endpoint templates and URL building.
//!
//! An [`Endpoint`] is a path template such as `cards/:id` plus the values
//! bound to its `:placeholders` and any query parameters. The template with
//! placeholders left unbound is the endpoint's *route*, which is what the
//! governor uses as the rate-limit bucket key: `cards/:id` shares one bucket
//! no matter which id is requested.

use std::borrow::Cow;

use url::Url;

use crate::error::HttpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    template: Cow<'static, str>,
    args: Vec<(String, String)>,
    query: Vec<(String, String)>,
}

impl Endpoint {
    /// Create an endpoint from a template. A leading `/` is ignored.
    pub fn new(template: impl Into<Cow<'static, str>>) -> Self {
        let template = match template.into() {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim_start_matches('/')),
            Cow::Owned(s) => Cow::Owned(s.trim_start_matches('/').to_string()),
        };
        Self {
            template,
            args: Vec::new(),
            query: Vec::new(),
        }
    }

    /// Bind a value to the `:name` placeholder. Rebinding replaces the value.
    pub fn bind(mut self, name: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        match self.args.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.args.push((name.to_string(), value)),
        }
        self
    }

    /// Append a query parameter. Values are sent as given, so `|` and `,`
    /// keep whatever meaning the remote API assigns them.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// The route: the template with placeholders unbound.
    pub fn route(&self) -> &str {
        &self.template
    }

    /// Names of the template's placeholders, in order.
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.template
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Resolve against `base`, substituting placeholders and appending the
    /// query string. Fails if a placeholder has no bound value.
    pub fn url(&self, base: &Url) -> Result<Url, HttpError> {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                HttpError::Configuration(format!("base URL {} cannot carry a path", base))
            })?;
            segments.pop_if_empty();
            for segment in self.template.split('/').filter(|s| !s.is_empty()) {
                match segment.strip_prefix(':') {
                    Some(name) => {
                        let value = self
                            .args
                            .iter()
                            .find(|(n, _)| n == name)
                            .map(|(_, v)| v.as_str())
                            .ok_or_else(|| {
                                HttpError::Configuration(format!(
                                    "unbound parameter :{} in {}",
                                    name, self.template
                                ))
                            })?;
                        segments.push(value);
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }

        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.magicthegathering.io/v1/").unwrap()
    }

    #[test]
    fn route_ignores_bound_values() {
        let a = Endpoint::new("cards/:id").bind("id", "abc");
        let b = Endpoint::new("/cards/:id").bind("id", "xyz");
        assert_eq!(a.route(), "cards/:id");
        assert_eq!(a.route(), b.route());
    }

    #[test]
    fn vars_lists_placeholders() {
        let ep = Endpoint::new("sets/:id/booster");
        assert_eq!(ep.vars().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn url_substitutes_and_keeps_base_path() {
        let url = Endpoint::new("sets/:id/booster")
            .bind("id", "KTK")
            .url(&base())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.magicthegathering.io/v1/sets/KTK/booster"
        );
    }

    #[test]
    fn url_encodes_query_delimiters() {
        let url = Endpoint::new("cards")
            .query("name", "nissa, worldwaker|jace")
            .query("pageSize", 1)
            .url(&base())
            .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "nissa, worldwaker|jace".to_string()),
                ("pageSize".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn url_escapes_path_values() {
        let url = Endpoint::new("cards/:id")
            .bind("id", "a/b c")
            .url(&base())
            .unwrap();
        assert_eq!(url.path(), "/v1/cards/a%2Fb%20c");
    }

    #[test]
    fn unbound_placeholder_is_a_configuration_error() {
        let err = Endpoint::new("cards/:id").url(&base()).unwrap_err();
        assert!(matches!(err, HttpError::Configuration(msg) if msg.contains(":id")));
    }

    #[test]
    fn rebinding_replaces_value() {
        let url = Endpoint::new("cards/:id")
            .bind("id", "1")
            .bind("id", "2")
            .url(&base())
            .unwrap();
        assert!(url.path().ends_with("/cards/2"));
    }
}
