//! Cipher orchestration: from encoded cipher string to playable URL

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::debug;
use url::{form_urlencoded, Url};

use crate::error::SigdecError;
use crate::eval::{DenoEvaluator, ScriptEvaluator};
use crate::extract::{self, ExtractedFunction};
use crate::ops::OperationPipeline;

/// Query key carrying the throttling token in the target URL.
pub const THROTTLE_KEY: &str = "n";

const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);
const CACHE_TTL: Duration = Duration::from_secs(600); // 10 minutes
const CACHE_CAPACITY: u64 = 16;

/// Immutable snapshot of one fetched player script.
///
/// Fetching and refreshing the text is the caller's job; a changed script
/// is a new `ScriptConfig`, never an edit of an existing one. Clones share
/// the underlying buffer, so snapshots are cheap to pass between threads.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    text: Arc<str>,
    fingerprint: u64,
}

impl ScriptConfig {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            fingerprint: hasher.finish(),
            text,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Cache key identifying this exact script version.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Decoded cipher parameters. Unlisted keys in the cipher string are
/// ignored; unrecognized keys in the target URL itself pass through
/// untouched.
#[derive(Debug, Clone)]
pub struct CipherParams {
    pub url: String,
    pub s: Option<String>,
    pub sp: Option<String>,
}

impl CipherParams {
    pub fn parse(encoded: &str) -> Result<Self, SigdecError> {
        let mut url = None;
        let mut s = None;
        let mut sp = None;

        for (key, value) in form_urlencoded::parse(encoded.as_bytes()) {
            match key.as_ref() {
                "url" => url = Some(value.into_owned()),
                "s" => s = Some(value.into_owned()),
                "sp" => sp = Some(value.into_owned()),
                _ => {}
            }
        }

        let url = url.ok_or_else(|| {
            SigdecError::Parse("cipher is missing the required 'url' key".to_string())
        })?;

        Ok(Self { url, s, sp })
    }
}

/// Receives intermediate and final URLs per video identifier, for external
/// persistence. The core only invokes the hook.
pub trait DebugHook: Send + Sync {
    fn on_url(&self, video_id: &str, stage: &str, url: &str);
}

/// Receives raw and decoded throttling-token values. Formatting and sinks
/// stay outside the core.
pub trait TokenObserver: Send + Sync {
    fn on_token(&self, raw: &str, decoded: &str);
}

/// Signature and throttling-token decipherer.
///
/// Holds per-script caches for the built operation pipeline and the
/// extracted token function, so repeated calls against one script version
/// skip re-extraction. All derived artifacts are immutable snapshots;
/// distinct calls are safe to run concurrently.
pub struct Decipherer {
    evaluator: Box<dyn ScriptEvaluator>,
    deadline: Duration,
    pipelines: Cache<u64, Arc<OperationPipeline>>,
    throttle_funcs: Cache<u64, Arc<ExtractedFunction>>,
    debug_hook: Option<Box<dyn DebugHook>>,
    observer: Option<Box<dyn TokenObserver>>,
}

impl Decipherer {
    pub fn new() -> Self {
        Self {
            evaluator: Box::new(DenoEvaluator::new()),
            deadline: DEFAULT_DEADLINE,
            pipelines: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            throttle_funcs: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            debug_hook: None,
            observer: None,
        }
    }

    /// Substitute a different sandboxed engine.
    pub fn with_evaluator(mut self, evaluator: impl ScriptEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    /// Deadline applied to every token-function evaluation.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_debug_hook(mut self, hook: impl DebugHook + 'static) -> Self {
        self.debug_hook = Some(Box::new(hook));
        self
    }

    pub fn with_observer(mut self, observer: impl TokenObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Decode an encoded cipher string into a playable URL.
    ///
    /// Both decode paths must fully succeed when applicable; a partially
    /// decoded URL is never returned.
    pub fn decipher_url(
        &self,
        config: &ScriptConfig,
        encoded_cipher: &str,
        video_id: &str,
    ) -> Result<String, SigdecError> {
        let params = CipherParams::parse(encoded_cipher)?;
        let mut uri = Url::parse(&params.url)?;

        if let Some(hook) = &self.debug_hook {
            hook.on_url(video_id, "intermediate", uri.as_str());
        }

        let mut query: Vec<(String, String)> = uri
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if let Some(scrambled) = &params.s {
            let decoded = self.decrypt_signature(config, scrambled)?;
            // The sp value is reproduced verbatim; an absent or empty sp
            // writes the signature under the empty query key, exactly like
            // the upstream format does.
            let sp = params.sp.clone().unwrap_or_default();
            debug!("Signature deciphered for {} (sp='{}')", video_id, sp);
            query.push((sp, decoded));
        }

        self.decrypt_query_throttle(config, &mut query)?;

        set_query(&mut uri, &query);

        if let Some(hook) = &self.debug_hook {
            hook.on_url(video_id, "final", uri.as_str());
        }

        Ok(uri.into())
    }

    /// Decode only the throttling token of an already-direct URL.
    pub fn unthrottle(
        &self,
        config: &ScriptConfig,
        url_str: &str,
        video_id: &str,
    ) -> Result<String, SigdecError> {
        let mut uri = Url::parse(url_str)?;

        if let Some(hook) = &self.debug_hook {
            hook.on_url(video_id, "intermediate", uri.as_str());
        }

        let mut query: Vec<(String, String)> = uri
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        self.decrypt_query_throttle(config, &mut query)?;
        set_query(&mut uri, &query);

        if let Some(hook) = &self.debug_hook {
            hook.on_url(video_id, "final", uri.as_str());
        }

        Ok(uri.into())
    }

    /// Unscramble one signature value via the extracted operation pipeline.
    pub fn decrypt_signature(
        &self,
        config: &ScriptConfig,
        scrambled: &str,
    ) -> Result<String, SigdecError> {
        self.pipeline_for(config)?.apply(scrambled)
    }

    /// Transform one raw throttling-token value by running the extracted
    /// function in the sandbox.
    pub fn decrypt_throttle(
        &self,
        config: &ScriptConfig,
        raw: &str,
    ) -> Result<String, SigdecError> {
        let func = self.throttle_func_for(config)?;
        let decoded = self.evaluator.evaluate(&func.source, raw, self.deadline)?;

        debug!("Throttle token decoded: {} -> {}", raw, decoded);
        if let Some(observer) = &self.observer {
            observer.on_token(raw, &decoded);
        }

        Ok(decoded)
    }

    fn decrypt_query_throttle(
        &self,
        config: &ScriptConfig,
        query: &mut [(String, String)],
    ) -> Result<(), SigdecError> {
        for pair in query.iter_mut() {
            if pair.0 == THROTTLE_KEY && !pair.1.is_empty() {
                pair.1 = self.decrypt_throttle(config, &pair.1)?;
            }
        }
        Ok(())
    }

    fn pipeline_for(&self, config: &ScriptConfig) -> Result<Arc<OperationPipeline>, SigdecError> {
        if let Some(pipeline) = self.pipelines.get(&config.fingerprint()) {
            return Ok(pipeline);
        }

        let located = extract::locate_operations(config.as_str())?;
        let pipeline = Arc::new(OperationPipeline::build(
            &located.calls,
            located.reverse_key.as_deref(),
            located.splice_key.as_deref(),
            located.swap_key.as_deref(),
        )?);

        self.pipelines.insert(config.fingerprint(), pipeline.clone());
        Ok(pipeline)
    }

    fn throttle_func_for(
        &self,
        config: &ScriptConfig,
    ) -> Result<Arc<ExtractedFunction>, SigdecError> {
        if let Some(func) = self.throttle_funcs.get(&config.fingerprint()) {
            return Ok(func);
        }

        let func = Arc::new(extract::extract_throttle_function(config.as_str())?);
        self.throttle_funcs
            .insert(config.fingerprint(), func.clone());
        Ok(func)
    }
}

impl Default for Decipherer {
    fn default() -> Self {
        Self::new()
    }
}

fn set_query(uri: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        uri.set_query(None);
    } else {
        let mut serializer = uri.query_pairs_mut();
        serializer.clear();
        serializer.extend_pairs(pairs);
    }
}
