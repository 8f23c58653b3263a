//! The small algebra a [`Handler`](crate::Handler) can return once it has
//! looked at a [`Request`](crate::Request): write a normal response, do
//! nothing and move on, suspend the connection and finish it later, drive an
//! upload body to completion, or hand the socket off behind an `Upgrade:`
//! response.
//!
//! [`Handled`](crate::Handled) already prevents a handler from forgetting to
//! write a response or writing two; `Action` extends that same opaque-marker
//! idea so the connection driver can see, at the type level, which of the few
//! legal next moves a handler chose.

use crate::http::post::PostEvent;
use crate::http::response::Response;
use crate::Handled;

/// What the connection driver should do after a [`Handler::handle`](crate::Handler::handle)
/// call returns. Constructed only via [`Action::respond`]/[`Action::r#continue`]/
/// [`Action::suspend`]/[`Action::process_upload`]/[`Action::parse_post`]/
/// [`Action::upgrade`]/[`Action::abort`], so a handler can't assemble an
/// inconsistent combination (e.g. a response body alongside an upgrade).
pub struct Action(pub(crate) ActionKind);

/// A handler's per-chunk view of an upload body: `data` is the next window of
/// bytes available, and `*unread` should be set (before returning) to how many
/// trailing bytes of `data` were *not* consumed yet — those bytes are
/// re-delivered at the head of the next call instead of being dropped. The
/// finalization call passes an empty `data` slice once the whole body has
/// been offered.
pub(crate) type UploadCallback =
    Box<dyn FnMut(&[u8], &mut usize, &mut Response) -> UploadAction + Send>;

/// A handler's per-event view of a [`PostProcessor`](crate::PostProcessor)
/// decode, one [`PostEvent`] at a time.
pub(crate) type PostIterator =
    Box<dyn for<'a> FnMut(PostEvent<'a>, &mut Response) -> UploadAction + Send>;

pub(crate) enum ActionKind {
    /// The response written via `Handled` is complete; send it and either
    /// keep the connection alive or close it per the usual keep-alive rules.
    Respond,
    /// Nothing to send for this request; move straight on to the next
    /// request on the same connection (or close it, per the same keep-alive
    /// rules `Respond` uses) without writing a byte.
    Continue,
    /// Park the connection (no read/write activity) until the handler's own
    /// out-of-band mechanism resumes it, up to `ConnLimits::suspend_timeout`.
    Suspend,
    /// Drive the already-buffered request body through `cb` in bounded
    /// chunks, then through one finalization call, before looking at what
    /// `cb` last returned; see spec §4.3.
    ProcessUpload(UploadCallback),
    /// Like `ProcessUpload`, but the body is first decoded by a
    /// [`PostProcessor`](crate::PostProcessor) (built from the request's
    /// `Content-Type`, with `buffer_size` as its key-accumulation bound) and
    /// `iter` is called once per decoded [`PostEvent`] instead of once per
    /// raw chunk.
    ParsePost(usize, PostIterator),
    /// The `101 Switching Protocols` response written via `Handled` is
    /// complete; the driver hands the raw socket to
    /// [`Handler::handle_upgrade`](crate::Handler::handle_upgrade) as an
    /// [`UpgradeHandle`](crate::UpgradeHandle) once it has finished sending
    /// the response bytes.
    Upgrade,
    /// Close the connection immediately without completing a response.
    Abort,
}

impl Action {
    /// A complete response was written to the [`Response`](crate::Response); send it.
    #[inline(always)]
    pub fn respond(_handled: Handled) -> Self {
        Action(ActionKind::Respond)
    }

    /// Do nothing for this request and move on to the next one (or close the
    /// connection, following the same keep-alive rules as `respond`) without
    /// writing a response.
    #[inline(always)]
    pub fn r#continue() -> Self {
        Action(ActionKind::Continue)
    }

    /// Suspend the connection: no bytes are read or written until the
    /// handler resumes it out of band, or `ConnLimits::suspend_timeout` elapses.
    #[inline(always)]
    pub fn suspend() -> Self {
        Action(ActionKind::Suspend)
    }

    /// Drive the request body to `cb` in bounded chunks (plus one
    /// finalization call with an empty slice), honoring whatever
    /// [`UploadAction`] each call returns. `cb` may close over whatever state
    /// it needs (the closure itself is the spec's "closure" parameter).
    #[inline(always)]
    pub fn process_upload<F>(cb: F) -> Self
    where
        F: FnMut(&[u8], &mut usize, &mut Response) -> UploadAction + Send + 'static,
    {
        Action(ActionKind::ProcessUpload(Box::new(cb)))
    }

    /// Decode the request body with a [`PostProcessor`](crate::PostProcessor)
    /// (its key-accumulation buffer bounded to `buffer_size` bytes) and hand
    /// each decoded [`PostEvent`] to `iter`.
    #[inline(always)]
    pub fn parse_post<F>(buffer_size: usize, iter: F) -> Self
    where
        F: for<'a> FnMut(PostEvent<'a>, &mut Response) -> UploadAction + Send + 'static,
    {
        Action(ActionKind::ParsePost(buffer_size, Box::new(iter)))
    }

    /// Complete a `101 Switching Protocols` response; the socket is handed
    /// to [`Handler::handle_upgrade`](crate::Handler::handle_upgrade) once
    /// the response bytes are flushed.
    #[inline(always)]
    pub fn upgrade(_handled: Handled) -> Self {
        Action(ActionKind::Upgrade)
    }

    /// Drop the connection without sending a response.
    #[inline(always)]
    pub fn abort() -> Self {
        Action(ActionKind::Abort)
    }
}

/// What to do next while an upload body (`ProcessUpload`/`ParsePost`) is
/// being driven; returned by the callback/iterator on every call, including
/// the final one. See spec §4.3/§6/§8.
pub enum UploadAction {
    /// Keep feeding more of the body (or more decoded events). Returning this
    /// from the finalization call is treated the same as `Abort`, since there
    /// is nothing left to feed.
    Continue,
    /// Park the connection, same as [`Action::suspend`].
    Suspend,
    /// Drop the connection without completing a response.
    Abort,
    /// A complete response was written to the [`Response`](crate::Response);
    /// stop feeding the body and send it.
    Respond(Handled),
}
