//! Registry of open sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{Session, SessionId, SessionWorker};
use crate::config::{AppConfig, ReferenceData};
use crate::error::{ReactiveError, ReactiveResult};

/// Wires the graph of a freshly opened session: declares inputs, builds
/// memos, effects and outputs.
pub type ServerFn = dyn Fn(&Session) -> ReactiveResult<()> + Send + Sync;

/// Opens, tracks and closes sessions. Safe to share between connection
/// handlers.
pub struct SessionManager {
    config: AppConfig,
    shared: Arc<ReferenceData>,
    server: Arc<ServerFn>,
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Open sessions plus sessions being wired. Checked against the limit.
    reserved: AtomicUsize,
}

impl SessionManager {
    pub fn new<F>(config: AppConfig, shared: Arc<ReferenceData>, server: F) -> Self
    where
        F: Fn(&Session) -> ReactiveResult<()> + Send + Sync + 'static,
    {
        Self {
            config,
            shared,
            server: Arc::new(server),
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn shared(&self) -> &Arc<ReferenceData> {
        &self.shared
    }

    /// Open a session and run the server function against it.
    ///
    /// If wiring fails the session is torn down and never registered.
    pub fn open(&self) -> ReactiveResult<Arc<Session>> {
        self.reserve()?;

        let session = Arc::new(Session::new(
            self.config.runtime.clone(),
            Arc::clone(&self.shared),
        ));
        if let Err(error) = (self.server)(&session) {
            tracing::warn!(session = %session.id(), %error, "session wiring failed");
            session.end();
            self.reserved.fetch_sub(1, Ordering::SeqCst);
            return Err(error);
        }

        self.sessions.insert(session.id(), Arc::clone(&session));
        tracing::info!(
            session = %session.id(),
            open = self.sessions.len(),
            nodes = session.runtime().node_count(),
            "session opened"
        );
        Ok(session)
    }

    /// Open a session and start its stimulus worker, with a queue of
    /// `stimulus_queue_capacity`. Must be called within a tokio runtime.
    pub fn open_worker(&self) -> ReactiveResult<SessionWorker> {
        let session = self.open()?;
        Ok(SessionWorker::spawn(
            session,
            self.config.stimulus_queue_capacity,
        ))
    }

    fn reserve(&self) -> ReactiveResult<()> {
        let limit = self.config.max_sessions;
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| match limit {
                Some(limit) if count >= limit => None,
                _ => Some(count + 1),
            })
            .map(|_| ())
            .map_err(|_| {
                let limit = limit.unwrap_or_default();
                tracing::warn!(limit, "session limit reached");
                ReactiveError::SessionLimit(limit)
            })
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// End and forget a session. Returns false if it was not open.
    pub fn close(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                session.end();
                self.reserved.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("max_sessions", &self.config.max_sessions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Memo;
    use crate::render::Artifact;
    use crate::session::Stimulus;
    use crate::table::Table;
    use crate::value::Value;

    fn manager(max_sessions: Option<usize>) -> SessionManager {
        let rows = Table::from_json(r#"[{"make": "Tesla", "range": 300}, {"make": "Nissan", "range": 150}]"#)
            .unwrap();
        let shared = Arc::new(ReferenceData::empty().with_table("ev", rows));
        let config = AppConfig {
            max_sessions,
            ..AppConfig::default()
        };
        SessionManager::new(config, shared, |session| {
            let make = session.input("make", "Tesla");
            let table = session
                .shared()
                .table("ev")
                .ok_or_else(|| ReactiveError::UnknownInput("ev".into()))?;
            let filtered = Memo::new(session.runtime(), move || {
                Ok(table.filter_eq("make", &make.get())?)
            });
            session.output("count", move || {
                Ok(Artifact::text(filtered.get()?.len().to_string()))
            })?;
            Ok(())
        })
    }

    #[test]
    fn open_wires_and_registers() {
        let manager = manager(None);
        let session = manager.open().unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(session.render("count"), Ok(Artifact::text("1")));
        assert!(manager.get(session.id()).is_some());
    }

    #[test]
    fn sessions_share_data_not_state() {
        let manager = manager(None);
        let (a, b) = (manager.open().unwrap(), manager.open().unwrap());
        assert!(Arc::ptr_eq(a.shared(), b.shared()));

        a.dispatch(&Stimulus::new().set("make", "Ford")).unwrap();
        assert_eq!(a.render("count"), Ok(Artifact::text("0")));
        assert_eq!(b.render("count"), Ok(Artifact::text("1")));
        assert_eq!(
            b.input_signal("make").unwrap().get(),
            Value::from("Tesla")
        );
    }

    #[test]
    fn limit_and_close() {
        let manager = manager(Some(1));
        let session = manager.open().unwrap();
        assert_eq!(manager.open().unwrap_err(), ReactiveError::SessionLimit(1));

        assert!(manager.close(session.id()));
        assert!(!session.is_active());
        assert!(!manager.close(session.id()));
        assert!(manager.is_empty());
        assert!(manager.open().is_ok());
    }

    #[test]
    fn limit_holds_under_concurrent_opens() {
        let manager = Arc::new(manager(Some(3)));
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.open().is_ok())
            })
            .collect();
        let opened = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(opened, 3);
        assert_eq!(manager.len(), 3);
    }

    #[tokio::test]
    async fn open_worker_uses_configured_queue() {
        let manager = SessionManager::new(
            AppConfig {
                stimulus_queue_capacity: 2,
                ..AppConfig::default()
            },
            Arc::new(ReferenceData::empty()),
            |session| {
                session.input("make", "Tesla");
                Ok(())
            },
        );
        let worker = manager.open_worker().unwrap();
        assert_eq!(worker.queue_capacity(), 2);

        let report = worker
            .send(Stimulus::new().set("make", "Kia"))
            .await
            .unwrap();
        assert_eq!(report.changed_inputs, vec!["make"]);
        assert!(manager.get(worker.session().id()).is_some());
        worker.shutdown().await;
    }

    #[test]
    fn failed_wiring_is_not_registered() {
        let manager = SessionManager::new(
            AppConfig::default(),
            Arc::new(ReferenceData::empty()),
            |_| Err(ReactiveError::UnknownInput("year".into())),
        );
        assert!(manager.open().is_err());
        assert!(manager.is_empty());
        assert_eq!(manager.reserved.load(Ordering::SeqCst), 0);
    }
}
