// author: kodeholic (powered by Claude)
// Session Store — spec §4.4의 세 갈래 색인(`accepting_by_endpoint`,
// `established_by_endpoint`, `established_by_cid`)을 하나의 타입으로 묶는다.
// 조회 우선순위, 중복 거부 규칙, 제거 시의 소유권 확인이 전부 여기 있다.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use crate::dtls_provider::DtlsRecord;
use crate::session::Session;

#[derive(Debug)]
pub enum StoreError {
    /// 같은 엔드포인트로 이미 accepting 또는 established 세션이 있다
    EndpointInUse(SocketAddr),
    /// 같은 CID를 쓰는 established 세션이 이미 있다
    DuplicateCid(Vec<u8>),
    /// CID 없는 세션이 이미 쓰고 있는 엔드포인트로 established 전환을 시도했다
    DuplicateEndpoint(SocketAddr),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::EndpointInUse(addr) => write!(f, "endpoint already in use: {}", addr),
            StoreError::DuplicateCid(cid) => write!(f, "connection id already in use: {:02x?}", cid),
            StoreError::DuplicateEndpoint(addr) => {
                write!(f, "endpoint already established without a cid: {}", addr)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Outcome of a lookup, per spec §4.4's strict ordered rules. The store
/// reports *which* index answered the lookup — `FoundByEndpoint` covers both
/// rule 2 (an established-without-cid session at that endpoint) and rule 3
/// (a still-handshaking session at that endpoint, regardless of whether the
/// packet carried a cid) — so callers never have to infer the index from
/// whether the input happened to carry a cid.
pub enum FindResult<R: DtlsRecord> {
    FoundByEndpoint(Arc<Session<R>>),
    FoundByConnectionId(Arc<Session<R>>),
    NotFound,
}

/// 모든 현재 살아있는 세션을 추적하는 레지스트리. 하나의 `Transport`가 하나의
/// `SessionStore`를 소유한다.
pub struct SessionStore<R: DtlsRecord> {
    accepting_by_endpoint: RwLock<HashMap<SocketAddr, Arc<Session<R>>>>,
    established_by_endpoint: RwLock<HashMap<SocketAddr, Arc<Session<R>>>>,
    established_by_cid: RwLock<HashMap<Vec<u8>, Arc<Session<R>>>>,
}

impl<R: DtlsRecord> Default for SessionStore<R> {
    fn default() -> Self {
        Self {
            accepting_by_endpoint: RwLock::new(HashMap::new()),
            established_by_endpoint: RwLock::new(HashMap::new()),
            established_by_cid: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: DtlsRecord> SessionStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 핸드셰이크 시도를 accepting 인덱스에 등록한다. 같은 엔드포인트가 이미
    /// accepting이든 established든 점유 중이면 거부한다.
    pub fn add(&self, endpoint: SocketAddr, session: Arc<Session<R>>) -> Result<(), StoreError> {
        if self.established_by_endpoint.read().unwrap().contains_key(&endpoint) {
            return Err(StoreError::EndpointInUse(endpoint));
        }
        let mut accepting = self.accepting_by_endpoint.write().unwrap();
        if accepting.contains_key(&endpoint) {
            return Err(StoreError::EndpointInUse(endpoint));
        }
        accepting.insert(endpoint, session);
        Ok(())
    }

    /// 핸드셰이크가 끝난 세션을 accepting에서 established 인덱스로 옮긴다.
    /// CID가 있으면 `established_by_cid`에만 등록하고, 없으면
    /// `established_by_endpoint`에만 등록한다 — 데이터 모델(spec §3)이 두
    /// 인덱스를 서로 배타적으로 정의하므로, CID 세션은 엔드포인트로는 찾을 수
    /// 없다(시나리오 b/c).
    pub fn notify_session_accepted(
        &self,
        initial_endpoint: SocketAddr,
        session: Arc<Session<R>>,
    ) -> Result<(), StoreError> {
        let current_endpoint = session.current_endpoint();
        let cid = session.connection_id();

        if let Some(cid) = &cid {
            if self.established_by_cid.read().unwrap().contains_key(cid) {
                return Err(StoreError::DuplicateCid(cid.clone()));
            }
        } else if self
            .established_by_endpoint
            .read()
            .unwrap()
            .contains_key(&current_endpoint)
        {
            return Err(StoreError::DuplicateEndpoint(current_endpoint));
        }

        self.accepting_by_endpoint
            .write()
            .unwrap()
            .remove(&initial_endpoint);

        if let Some(cid) = &cid {
            self.established_by_cid
                .write()
                .unwrap()
                .insert(cid.clone(), Arc::clone(&session));
        } else {
            self.established_by_endpoint
                .write()
                .unwrap()
                .insert(current_endpoint, session);
        }
        Ok(())
    }

    /// 조회 우선순위 (spec §4.4, strict variant): (1) CID가 주어졌다면
    /// `established_by_cid`가 최우선 — 맞으면 `FoundByConnectionId`로 끝난다.
    /// (2) CID가 주어지지 *않았을 때만* `established_by_endpoint`를 본다 — CID를
    /// 가진 세션은 애초에 거기 없으므로 이 분기는 cid 유무로 게이트해야 한다
    /// (CID가 있는데 `established_by_cid`에서 못 찾았다고 해서 같은 엔드포인트의
    /// 무관한 established-without-cid 세션으로 새야 할 이유는 없다). (3) 위 둘
    /// 다 실패하면, CID 유무와 무관하게 `accepting_by_endpoint`를 본다 — 아직
    /// 핸드셰이크 중이라 CID가 뭐가 될지 모르는 세션으로 재전송/보호된 레코드가
    /// 먼저 도착할 수 있기 때문이다. (4) 그래도 없으면 `NotFound`.
    pub fn try_find(&self, endpoint: SocketAddr, cid: Option<&[u8]>) -> FindResult<R> {
        if let Some(cid) = cid {
            if let Some(session) = self.established_by_cid.read().unwrap().get(cid) {
                return FindResult::FoundByConnectionId(Arc::clone(session));
            }
        } else if let Some(session) = self.established_by_endpoint.read().unwrap().get(&endpoint) {
            return FindResult::FoundByEndpoint(Arc::clone(session));
        }

        match self.accepting_by_endpoint.read().unwrap().get(&endpoint) {
            Some(session) => FindResult::FoundByEndpoint(Arc::clone(session)),
            None => FindResult::NotFound,
        }
    }

    /// 세 색인 모두에서 제거한다. 엔드포인트 마이그레이션 이후에는 같은 키로
    /// 다른 세션이 이미 등록돼 있을 수 있으므로, 매번 포인터가 같은 세션을
    /// 가리킬 때만 지운다 — 먼저 끝난 세션의 뒤늦은 정리가 방금 들어온 세션을
    /// 쫓아내는 일을 막는다. CID가 있는 세션은 애초에 `established_by_endpoint`에
    /// 들어간 적이 없으므로 그쪽은 건드리지 않는다.
    pub fn remove(&self, session: &Arc<Session<R>>) {
        let initial = session.initial_endpoint();
        let current = session.current_endpoint();
        let cid = session.connection_id();

        remove_if_owned(&self.accepting_by_endpoint, &initial, session);
        if let Some(cid) = cid {
            remove_if_owned(&self.established_by_cid, &cid, session);
        } else {
            remove_if_owned(&self.established_by_endpoint, &current, session);
        }
    }

    pub fn get_sessions(&self) -> Vec<Arc<Session<R>>> {
        let mut out: Vec<Arc<Session<R>>> = Vec::new();
        out.extend(self.accepting_by_endpoint.read().unwrap().values().cloned());
        out.extend(
            self.established_by_endpoint
                .read()
                .unwrap()
                .values()
                .cloned(),
        );
        out.extend(self.established_by_cid.read().unwrap().values().cloned());
        out
    }

    pub fn get_count(&self) -> usize {
        self.accepting_by_endpoint.read().unwrap().len()
            + self.established_by_endpoint.read().unwrap().len()
            + self.established_by_cid.read().unwrap().len()
    }
}

fn remove_if_owned<K: std::hash::Hash + Eq, R: DtlsRecord>(
    map: &RwLock<HashMap<K, Arc<Session<R>>>>,
    key: &K,
    session: &Arc<Session<R>>,
) {
    let mut map = map.write().unwrap();
    if let Some(existing) = map.get(key) {
        if Arc::ptr_eq(existing, session) {
            map.remove(key);
        }
    }
}
