/// Observable state of one [`super::FetchController`].
///
/// Published wholesale on every transition. While `loading` is set exactly
/// one of `is_initial_loading` / `is_refreshing` is set; both are clear once
/// the cycle settles.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub is_initial_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<String>,
}

/// Coarse lifecycle position derived from a [`FetchState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    InitialLoading,
    Refreshing,
    Success,
    Error,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

impl<T> FetchState<T> {
    pub fn idle() -> Self {
        Self {
            data: None,
            loading: false,
            is_initial_loading: false,
            is_refreshing: false,
            error: None,
        }
    }

    /// Entering a cycle: data and error are cleared.
    pub fn loading(initial: bool) -> Self {
        Self {
            data: None,
            loading: true,
            is_initial_loading: initial,
            is_refreshing: !initial,
            error: None,
        }
    }

    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::idle()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::idle()
        }
    }

    pub fn phase(&self) -> FetchPhase {
        match (self.loading, self.is_initial_loading, &self.error, &self.data) {
            (true, true, _, _) => FetchPhase::InitialLoading,
            (true, false, _, _) => FetchPhase::Refreshing,
            (false, _, Some(_), _) => FetchPhase::Error,
            (false, _, None, Some(_)) => FetchPhase::Success,
            (false, _, None, None) => FetchPhase::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_sets_exactly_one_flag() {
        let initial = FetchState::<()>::loading(true);
        assert!(initial.loading && initial.is_initial_loading && !initial.is_refreshing);
        assert_eq!(initial.phase(), FetchPhase::InitialLoading);

        let refresh = FetchState::<()>::loading(false);
        assert!(refresh.loading && !refresh.is_initial_loading && refresh.is_refreshing);
        assert_eq!(refresh.phase(), FetchPhase::Refreshing);
    }

    #[test]
    fn settled_states_clear_flags() {
        let ok = FetchState::success(42);
        assert_eq!(ok.phase(), FetchPhase::Success);
        assert!(!ok.loading && !ok.is_initial_loading && !ok.is_refreshing);

        let err = FetchState::<i32>::failed("boom");
        assert_eq!(err.phase(), FetchPhase::Error);
        assert_eq!(err.error.as_deref(), Some("boom"));
        assert!(err.data.is_none());

        assert_eq!(FetchState::<i32>::default().phase(), FetchPhase::Idle);
    }
}
