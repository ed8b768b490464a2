//! The route engine: the single owner of the operator's local state.
//!
//! One task processes operator commands and store completions in arrival order. Every
//! mutation of the local state happens on that task, synchronously, before the next message
//! is looked at. Store calls run on spawned tasks and come back as a [`Completion`] tagged
//! with the identity of the operation (placeholder or link id), never with a list index.
//! Reads run concurrently. Writes reach the store one at a time, in the order the operator
//! issued them.

mod catalog_ops;
mod sequence_ops;
mod view;


use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

pub use view::{EngineView, Notice};

use crate::{
    error::{EngineError, StoreError},
    geocoding::{DraftId, DraftSlot, GeocodeResult},
    model::{
        LinkId, LinkKey, PlaceholderId, RemovedEntry, RouteDb, RouteId, RouteSequence,
        RouteStopDb, StopDb, StopId,
    },
    store::RouteStore,
};

const REQUEST_QUEUE: usize = 32;
const COMPLETION_QUEUE: usize = 256;
const NOTICE_BUFFER: usize = 64;

type Reply = oneshot::Sender<Result<EngineView, EngineError>>;
type Write = BoxFuture<'static, Completion>;

/// A catalog the change feed can invalidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Catalog {
    Routes,
    Stops,
}

enum Command {
    Snapshot,
    RefreshCatalogs,
    CatalogChanged(Catalog),
    SelectRoute(Option<RouteId>),
    AddStop(StopId),
    RemoveLink(LinkKey),
    Reorder { from: usize, to: usize },
    CreateRoute(String),
    DeleteRoute(RouteId),
    DeleteStop(StopId),
    MapClicked { lat: f64, lng: f64 },
    GeocoderSelected(GeocodeResult),
    RenameDraft(String),
    DiscardDraft,
    CommitDraft,
    WaitIdle,
}

struct Request {
    command: Command,
    reply: Reply,
}

/// The result of a store call, re-entering the engine loop.
enum Completion {
    RoutesFetched {
        generation: u64,
        result: Result<Vec<RouteDb>, StoreError>,
    },
    StopsFetched {
        generation: u64,
        result: Result<Vec<StopDb>, StoreError>,
    },
    SequenceLoaded {
        route_id: RouteId,
        generation: u64,
        result: Result<Vec<RouteStopDb>, StoreError>,
    },
    LinkCreated {
        route_id: RouteId,
        placeholder: PlaceholderId,
        result: Result<RouteStopDb, StoreError>,
    },
    LinkDeleted {
        route_id: RouteId,
        link_id: LinkId,
        result: Result<(), StoreError>,
    },
    OrderPersisted {
        route_id: RouteId,
        result: Result<(), StoreError>,
    },
    RouteCreated {
        result: Result<RouteDb, StoreError>,
        reply: Reply,
    },
    RouteDeleted {
        route_id: RouteId,
        result: Result<(), StoreError>,
        reply: Reply,
    },
    StopCreated {
        draft_id: DraftId,
        result: Result<StopDb, StoreError>,
        reply: Reply,
    },
    StopDeleted {
        stop_id: StopId,
        result: Result<(), StoreError>,
        reply: Reply,
    },
}

/// Cheap to clone. Every method is answered once the engine has applied the command to its
/// local state; store calls the command started may still be outstanding.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    requests: mpsc::Sender<Request>,
    notices: broadcast::Sender<Notice>,
}

impl EngineHandle {
    async fn send(&self, command: Command) -> Result<EngineView, EngineError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request { command, reply })
            .await
            .map_err(|_| EngineError::EngineStopped)?;

        response.await.map_err(|_| EngineError::EngineStopped)?
    }

    pub async fn snapshot(&self) -> Result<EngineView, EngineError> {
        self.send(Command::Snapshot).await
    }

    /// Refetches both catalogs.
    pub async fn refresh_catalogs(&self) -> Result<EngineView, EngineError> {
        self.send(Command::RefreshCatalogs).await
    }

    /// Called by the change feed when the store reports a change to a catalog's tables.
    pub async fn catalog_changed(&self, catalog: Catalog) -> Result<EngineView, EngineError> {
        self.send(Command::CatalogChanged(catalog)).await
    }

    /// Answers once the route's stops are loaded.
    pub async fn select_route(&self, route_id: Option<RouteId>) -> Result<EngineView, EngineError> {
        self.send(Command::SelectRoute(route_id)).await
    }

    pub async fn add_stop(&self, stop_id: StopId) -> Result<EngineView, EngineError> {
        self.send(Command::AddStop(stop_id)).await
    }

    pub async fn remove_link(&self, link: LinkKey) -> Result<EngineView, EngineError> {
        self.send(Command::RemoveLink(link)).await
    }

    pub async fn reorder(&self, from: usize, to: usize) -> Result<EngineView, EngineError> {
        self.send(Command::Reorder { from, to }).await
    }

    /// Answers once the store has created the route.
    pub async fn create_route(&self, name: String) -> Result<EngineView, EngineError> {
        self.send(Command::CreateRoute(name)).await
    }

    /// Answers once the store has deleted the route.
    pub async fn delete_route(&self, route_id: RouteId) -> Result<EngineView, EngineError> {
        self.send(Command::DeleteRoute(route_id)).await
    }

    /// Answers once the store has deleted the stop.
    pub async fn delete_stop(&self, stop_id: StopId) -> Result<EngineView, EngineError> {
        self.send(Command::DeleteStop(stop_id)).await
    }

    pub async fn map_clicked(&self, lat: f64, lng: f64) -> Result<EngineView, EngineError> {
        self.send(Command::MapClicked { lat, lng }).await
    }

    pub async fn geocoder_selected(
        &self,
        result: GeocodeResult,
    ) -> Result<EngineView, EngineError> {
        self.send(Command::GeocoderSelected(result)).await
    }

    pub async fn rename_draft(&self, name: String) -> Result<EngineView, EngineError> {
        self.send(Command::RenameDraft(name)).await
    }

    pub async fn discard_draft(&self) -> Result<EngineView, EngineError> {
        self.send(Command::DiscardDraft).await
    }

    /// Answers once the store has created the stop.
    pub async fn commit_draft(&self) -> Result<EngineView, EngineError> {
        self.send(Command::CommitDraft).await
    }

    /// Answers once no store call is outstanding.
    pub async fn wait_idle(&self) -> Result<EngineView, EngineError> {
        self.send(Command::WaitIdle).await
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

struct Selection {
    route_id: RouteId,
    generation: u64,
    /// `None` while the stops are loading.
    sequence: Option<RouteSequence>,
}

struct Engine {
    store: Arc<dyn RouteStore>,
    completions: mpsc::Sender<Completion>,
    writes: mpsc::UnboundedSender<Write>,
    notices: broadcast::Sender<Notice>,

    routes: Vec<RouteDb>,
    stops: Vec<StopDb>,
    routes_generation: u64,
    stops_generation: u64,

    selection: Option<Selection>,
    select_generation: u64,
    select_waiters: Vec<Reply>,

    draft: DraftSlot,

    last_placeholder: u64,
    /// Pending links the operator removed before their create call resolved.
    cancelled_adds: HashSet<PlaceholderId>,
    /// Entries removed locally whose delete call is outstanding, for rollback.
    removals: HashMap<LinkId, RemovedEntry>,
    /// Outstanding delete and order sync calls.
    saving: usize,

    in_flight: usize,
    idle_waiters: Vec<Reply>,
}

/// Starts the engine on its own task. The task ends once every handle is dropped and the
/// outstanding store calls have resolved.
pub fn spawn(store: Arc<dyn RouteStore>) -> (EngineHandle, JoinHandle<()>) {
    let (requests, request_receiver) = mpsc::channel(REQUEST_QUEUE);
    let (completions, completion_receiver) = mpsc::channel(COMPLETION_QUEUE);
    let (notices, _) = broadcast::channel(NOTICE_BUFFER);
    let (writes, write_receiver) = mpsc::unbounded_channel();

    tokio::spawn(write_in_order(write_receiver, completions.clone()));

    let engine = Engine {
        store,
        completions,
        writes,
        notices: notices.clone(),
        routes: vec![],
        stops: vec![],
        routes_generation: 0,
        stops_generation: 0,
        selection: None,
        select_generation: 0,
        select_waiters: vec![],
        draft: DraftSlot::default(),
        last_placeholder: 0,
        cancelled_adds: HashSet::new(),
        removals: HashMap::new(),
        saving: 0,
        in_flight: 0,
        idle_waiters: vec![],
    };

    let task = tokio::spawn(engine.run(request_receiver, completion_receiver));

    (EngineHandle { requests, notices }, task)
}

async fn write_in_order(
    mut writes: mpsc::UnboundedReceiver<Write>,
    completions: mpsc::Sender<Completion>,
) {
    while let Some(write) = writes.recv().await {
        let completion = write.await;
        if completions.send(completion).await.is_err() {
            debug!("engine stopped before a store write resolved");
            break;
        }
    }
}

impl Engine {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut completions: mpsc::Receiver<Completion>,
    ) {
        let mut accepting = true;

        loop {
            tokio::select! {
                Some(completion) = completions.recv() => {
                    self.in_flight -= 1;
                    self.on_completion(completion);
                }
                request = requests.recv(), if accepting => match request {
                    Some(Request { command, reply }) => self.on_command(command, reply),
                    None => accepting = false,
                },
                else => break,
            }

            if self.in_flight == 0 {
                for waiter in std::mem::take(&mut self.idle_waiters) {
                    self.respond(waiter, Ok(()));
                }
                if !accepting {
                    break;
                }
            }
        }

        info!("route engine stopped");
    }

    fn on_command(&mut self, command: Command, reply: Reply) {
        let result = match command {
            Command::Snapshot => Ok(()),
            Command::RefreshCatalogs => {
                self.refresh_catalog(Catalog::Routes);
                self.refresh_catalog(Catalog::Stops);
                Ok(())
            }
            Command::CatalogChanged(catalog) => {
                debug!(?catalog, "catalog changed in the store");
                self.refresh_catalog(catalog);
                Ok(())
            }
            Command::AddStop(stop_id) => self.add_stop(stop_id),
            Command::RemoveLink(link) => self.remove_link(link),
            Command::Reorder { from, to } => self.reorder(from, to),
            Command::MapClicked { lat, lng } => {
                self.draft.open_at(lat, lng);
                Ok(())
            }
            Command::GeocoderSelected(result) => {
                self.draft.open_from_result(result);
                Ok(())
            }
            Command::RenameDraft(name) => self.draft.rename(name).map(|_| ()),
            Command::DiscardDraft => {
                self.draft.discard();
                Ok(())
            }

            // answered when their store calls resolve
            Command::SelectRoute(route_id) => return self.select_route(route_id, reply),
            Command::CreateRoute(name) => return self.create_route(name, reply),
            Command::DeleteRoute(route_id) => return self.delete_route(route_id, reply),
            Command::DeleteStop(stop_id) => return self.delete_stop(stop_id, reply),
            Command::CommitDraft => return self.commit_draft(reply),
            Command::WaitIdle => {
                if self.in_flight > 0 {
                    self.idle_waiters.push(reply);
                    return;
                }
                Ok(())
            }
        };

        self.respond(reply, result);
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::RoutesFetched { generation, result } => {
                self.on_routes_fetched(generation, result)
            }
            Completion::StopsFetched { generation, result } => {
                self.on_stops_fetched(generation, result)
            }
            Completion::SequenceLoaded {
                route_id,
                generation,
                result,
            } => self.on_sequence_loaded(route_id, generation, result),
            Completion::LinkCreated {
                route_id,
                placeholder,
                result,
            } => self.on_link_created(route_id, placeholder, result),
            Completion::LinkDeleted {
                route_id,
                link_id,
                result,
            } => self.on_link_deleted(route_id, link_id, result),
            Completion::OrderPersisted { route_id, result } => {
                self.on_order_persisted(route_id, result)
            }
            Completion::RouteCreated { result, reply } => self.on_route_created(result, reply),
            Completion::RouteDeleted {
                route_id,
                result,
                reply,
            } => self.on_route_deleted(route_id, result, reply),
            Completion::StopCreated {
                draft_id,
                result,
                reply,
            } => self.on_stop_created(draft_id, result, reply),
            Completion::StopDeleted {
                stop_id,
                result,
                reply,
            } => self.on_stop_deleted(stop_id, result, reply),
        }
    }

    fn respond(&self, reply: Reply, result: Result<(), EngineError>) {
        // the caller may have gone away, the state change stands either way
        _ = reply.send(result.map(|()| self.view()));
    }

    /// Runs a store read off the engine task and feeds its result back into the loop.
    fn spawn_call<F>(&mut self, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let completions = self.completions.clone();
        tokio::spawn(
            async move {
                let completion = call.await;
                if completions.send(completion).await.is_err() {
                    debug!("engine stopped before a store call resolved");
                }
            }
            .in_current_span(),
        );
    }

    /// Queues a store write behind the writes issued before it.
    fn spawn_write<F>(&mut self, write: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        if self.writes.send(write.in_current_span().boxed()).is_err() {
            warn!("store writer has stopped, dropping a write");
            return;
        }
        self.in_flight += 1;
    }

    /// Turns a store error into an operator notice.
    fn surface(&self, message: impl Into<String>, err: &StoreError) {
        let notice = Notice::new(err.kind(), message.into());
        warn!(kind = ?notice.kind, error = %err, "{}", notice.message);
        // nobody listening is fine
        _ = self.notices.send(notice);
    }

    fn next_placeholder(&mut self) -> PlaceholderId {
        self.last_placeholder += 1;
        PlaceholderId(self.last_placeholder)
    }
}
