pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::Result;

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Raw body bytes; decoding is left to the parser.
    pub body: Vec<u8>,
    /// URL that finally answered, after following redirects.
    pub final_url: String,
    /// Every URL visited before `final_url`, starting with the requested one.
    pub redirect_chain: Vec<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn redirected(&self) -> bool {
        !self.redirect_chain.is_empty()
    }
}

#[async_trait]
pub trait Fetcher {
    /// Fetch `url`, following redirects. Non-2xx statuses are returned as
    /// responses; only transport failures and timeouts are errors.
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// In-memory fetcher serving canned documents, for tests.
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::{FetchResponse, Fetcher};
    use crate::app::{RelayError, Result};

    enum Reply {
        Body { status: u16, body: Vec<u8> },
        Redirect(String),
        Timeout,
    }

    /// Pauses the next fetch of one URL until released.
    #[derive(Clone, Default)]
    pub struct Hold {
        /// Notified once the held fetch has started.
        pub entered: Arc<Notify>,
        pub release: Arc<Notify>,
    }

    #[derive(Default)]
    pub struct ScriptedFetcher {
        replies: Mutex<HashMap<String, Reply>>,
        holds: Mutex<HashMap<String, Hold>>,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        fn set(&self, url: &str, reply: Reply) {
            self.replies.lock().unwrap().insert(url.to_string(), reply);
        }

        pub fn serve(&self, url: &str, body: &str) {
            self.set(
                url,
                Reply::Body {
                    status: 200,
                    body: body.as_bytes().to_vec(),
                },
            );
        }

        pub fn fail(&self, url: &str, status: u16) {
            self.set(
                url,
                Reply::Body {
                    status,
                    body: Vec::new(),
                },
            );
        }

        pub fn redirect(&self, from: &str, to: &str) {
            self.set(from, Reply::Redirect(to.to_string()));
        }

        pub fn time_out(&self, url: &str) {
            self.set(url, Reply::Timeout);
        }

        pub fn hold(&self, url: &str) -> Hold {
            let hold = Hold::default();
            self.holds
                .lock()
                .unwrap()
                .insert(url.to_string(), hold.clone());
            hold
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResponse> {
            let hold = self.holds.lock().unwrap().remove(url);
            if let Some(hold) = hold {
                hold.entered.notify_one();
                hold.release.notified().await;
            }

            let replies = self.replies.lock().unwrap();
            let mut current = url.to_string();
            let mut chain = Vec::new();
            loop {
                match replies.get(&current) {
                    Some(Reply::Body { status, body }) => {
                        return Ok(FetchResponse {
                            status: *status,
                            body: body.clone(),
                            final_url: current,
                            redirect_chain: chain,
                        })
                    }
                    Some(Reply::Redirect(to)) => {
                        if chain.len() >= 10 {
                            return Err(RelayError::TooManyRedirects(url.to_string()));
                        }
                        chain.push(std::mem::replace(&mut current, to.clone()));
                    }
                    Some(Reply::Timeout) => return Err(RelayError::Timeout(url.to_string())),
                    None => {
                        return Ok(FetchResponse {
                            status: 404,
                            body: Vec::new(),
                            final_url: current,
                            redirect_chain: chain,
                        })
                    }
                }
            }
        }
    }
}
