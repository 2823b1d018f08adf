use std::fmt;

use super::watchpb::watch_request::RequestUnion;
use super::watchpb::Endpoint;
use super::watchpb::EventType;
use super::watchpb::Subject;
use super::watchpb::WatchCancelRequest;
use super::watchpb::WatchCreateRequest;
use super::watchpb::WatchRequest;
use super::watchpb::WatchResponse;

impl Subject {
    pub fn new(
        name: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.env)
    }
}

impl Endpoint {
    pub fn new(
        ip: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl WatchRequest {
    pub fn create(
        watch_id: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            request_union: Some(RequestUnion::CreateRequest(WatchCreateRequest {
                watch_id: watch_id.into(),
                subject: Some(subject),
            })),
        }
    }

    pub fn cancel(watch_id: impl Into<String>) -> Self {
        Self {
            request_union: Some(RequestUnion::CancelRequest(WatchCancelRequest {
                watch_id: watch_id.into(),
            })),
        }
    }

    /// Watch id carried by either request variant.
    pub fn watch_id(&self) -> Option<&str> {
        match &self.request_union {
            Some(RequestUnion::CreateRequest(req)) => Some(&req.watch_id),
            Some(RequestUnion::CancelRequest(req)) => Some(&req.watch_id),
            None => None,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self.request_union, Some(RequestUnion::CreateRequest(_)))
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self.request_union, Some(RequestUnion::CancelRequest(_)))
    }
}

impl From<WatchCreateRequest> for WatchRequest {
    fn from(req: WatchCreateRequest) -> Self {
        Self {
            request_union: Some(RequestUnion::CreateRequest(req)),
        }
    }
}

impl From<WatchCancelRequest> for WatchRequest {
    fn from(req: WatchCancelRequest) -> Self {
        Self {
            request_union: Some(RequestUnion::CancelRequest(req)),
        }
    }
}

impl WatchResponse {
    /// First response of a watch: registration confirmed, carrying the
    /// current endpoints of the subject.
    pub fn created(
        subject: Subject,
        endpoints: Vec<Endpoint>,
    ) -> Self {
        Self {
            created: true,
            event: EventType::Update as i32,
            subject: Some(subject),
            endpoints,
            ..Default::default()
        }
    }

    pub fn update(
        subject: Subject,
        endpoints: Vec<Endpoint>,
    ) -> Self {
        Self {
            event: EventType::Update as i32,
            subject: Some(subject),
            endpoints,
            ..Default::default()
        }
    }

    /// Last response of a watch.
    pub fn canceled(
        subject: Option<Subject>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            canceled: true,
            cancel_reason: reason.into(),
            subject,
            ..Default::default()
        }
    }

    /// Create refused by the server: the watch never became active.
    pub fn rejected(
        subject: Option<Subject>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            created: false,
            canceled: true,
            cancel_reason: reason.into(),
            subject,
            ..Default::default()
        }
    }

    pub fn is_update(&self) -> bool {
        !self.created && !self.canceled
    }
}
