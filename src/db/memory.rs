use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::db::operations::conversations::{ConversationSummary, NewConversation};
use crate::db::operations::lessons::{
    ExerciseRecord, LessonRecord, LessonSummary, NewAttempt, NewLesson, PersistedLesson,
};
use crate::db::pagination::{Page, PageRequest};
use crate::db::{Store, StoreError};
use crate::schema::{ConversationSession, ConversationTurn};

#[derive(Default)]
struct Tables {
    users: HashSet<Uuid>,
    // Insertion order; listings walk these backwards for newest-first.
    lessons: Vec<LessonRecord>,
    exercises: HashMap<Uuid, ExerciseRecord>,
    attempts: Vec<(Uuid, NewAttempt)>,
    conversations: Vec<ConversationSession>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts_for(&self, exercise_id: Uuid) -> Vec<NewAttempt> {
        self.tables
            .read()
            .attempts
            .iter()
            .filter(|(_, attempt)| attempt.exercise_id == exercise_id)
            .map(|(_, attempt)| attempt.clone())
            .collect()
    }
}

fn paginate<T: Clone>(newest_first: Vec<T>, page: PageRequest) -> Page<T> {
    let total = newest_first.len() as i64;
    let items = newest_first
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    Page::new(items, total, page)
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.tables.write().users.insert(user_id);
        Ok(())
    }

    async fn insert_lesson(&self, lesson: &NewLesson) -> Result<PersistedLesson, StoreError> {
        let lesson_id = Uuid::new_v4();
        let exercises: Vec<ExerciseRecord> = lesson
            .worksheet
            .exercises
            .iter()
            .enumerate()
            .map(|(order_index, exercise)| ExerciseRecord {
                id: Uuid::new_v4(),
                lesson_id,
                kind: exercise.kind,
                question: exercise.question.clone(),
                correct_answer: exercise.answer.clone(),
                hint: exercise.hint.clone(),
                order_index: order_index as i32,
            })
            .collect();
        let exercise_ids = exercises.iter().map(|e| e.id).collect();

        let mut tables = self.tables.write();
        if !tables.users.contains(&lesson.user_id) {
            return Err(StoreError::NotFound {
                entity: "user",
                id: lesson.user_id,
            });
        }
        for exercise in &exercises {
            tables.exercises.insert(exercise.id, exercise.clone());
        }
        tables.lessons.push(LessonRecord {
            id: lesson_id,
            user_id: lesson.user_id,
            target_language: lesson.target_language,
            scenario: lesson.scenario.clone(),
            grammar_focus: lesson.grammar_focus.clone(),
            difficulty: lesson.difficulty,
            worksheet: lesson.worksheet.clone(),
            version: 1,
            created_at: Utc::now(),
            exercises,
        });

        Ok(PersistedLesson { lesson_id, exercise_ids })
    }

    async fn get_lesson(&self, lesson_id: Uuid) -> Result<Option<LessonRecord>, StoreError> {
        Ok(self.tables.read().lessons.iter().find(|l| l.id == lesson_id).cloned())
    }

    async fn get_exercise(&self, exercise_id: Uuid) -> Result<Option<ExerciseRecord>, StoreError> {
        Ok(self.tables.read().exercises.get(&exercise_id).cloned())
    }

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<Uuid, StoreError> {
        let mut tables = self.tables.write();
        if !tables.exercises.contains_key(&attempt.exercise_id) {
            return Err(StoreError::NotFound {
                entity: "exercise",
                id: attempt.exercise_id,
            });
        }
        let id = Uuid::new_v4();
        tables.attempts.push((id, attempt.clone()));
        Ok(id)
    }

    async fn list_lessons(&self, page: PageRequest, user_id: Option<Uuid>) -> Result<Page<LessonSummary>, StoreError> {
        let summaries = self
            .tables
            .read()
            .lessons
            .iter()
            .rev()
            .filter(|l| user_id.map_or(true, |id| l.user_id == id))
            .map(|l| LessonSummary {
                id: l.id,
                scenario: l.scenario.clone(),
                target_language: l.target_language,
                difficulty: l.difficulty,
                exercise_count: l.exercises.len() as i64,
                created_at: l.created_at,
            })
            .collect();
        Ok(paginate(summaries, page))
    }

    async fn create_conversation(&self, conversation: &NewConversation) -> Result<ConversationSession, StoreError> {
        let mut tables = self.tables.write();
        if !tables.users.contains(&conversation.user_id) {
            return Err(StoreError::NotFound {
                entity: "user",
                id: conversation.user_id,
            });
        }
        let session = ConversationSession {
            id: Uuid::new_v4(),
            user_id: conversation.user_id,
            target_language: conversation.target_language,
            scenario_context: conversation.scenario_context.clone(),
            created_at: Utc::now(),
            turns: Vec::new(),
        };
        tables.conversations.push(session.clone());
        Ok(session)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<ConversationSession>, StoreError> {
        Ok(self
            .tables
            .read()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned())
    }

    async fn append_exchange(
        &self,
        conversation_id: Uuid,
        user_turn: &ConversationTurn,
        assistant_turn: &ConversationTurn,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let session = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or(StoreError::NotFound {
                entity: "conversation",
                id: conversation_id,
            })?;

        let expected = session.next_turn_index();
        if user_turn.turn_index != expected || assistant_turn.turn_index != expected + 1 {
            return Err(StoreError::Conflict(format!(
                "expected turn {expected}, got {}",
                user_turn.turn_index
            )));
        }

        session.turns.push(user_turn.clone());
        session.turns.push(assistant_turn.clone());
        Ok(())
    }

    async fn list_conversations(
        &self,
        page: PageRequest,
        user_id: Option<Uuid>,
    ) -> Result<Page<ConversationSummary>, StoreError> {
        let summaries = self
            .tables
            .read()
            .conversations
            .iter()
            .rev()
            .filter(|c| user_id.map_or(true, |id| c.user_id == id))
            .map(|c| ConversationSummary {
                id: c.id,
                target_language: c.target_language,
                scenario_context: c.scenario_context.clone(),
                turn_count: c.turns.len() as i64,
                created_at: c.created_at,
            })
            .collect();
        Ok(paginate(summaries, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Language;

    async fn store_with_conversation() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.ensure_user(user_id).await.unwrap();
        let session = store
            .create_conversation(&NewConversation {
                user_id,
                target_language: Language::Fr,
                scenario_context: None,
            })
            .await
            .unwrap();
        (store, session.id)
    }

    #[tokio::test]
    async fn append_rejects_stale_index() {
        let (store, id) = store_with_conversation().await;
        let user = ConversationTurn::user(0, "Bonjour", None);
        let reply = ConversationTurn::assistant(1, "Bonjour !");
        store.append_exchange(id, &user, &reply).await.unwrap();

        let err = store.append_exchange(id, &user, &reply).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let session = store.get_conversation(id).await.unwrap().unwrap();
        assert_eq!(session.turns.len(), 2);
        assert!(session.is_well_formed());
    }

    #[tokio::test]
    async fn writes_require_known_user() {
        let store = MemoryStore::new();
        let page = store.list_lessons(PageRequest::default(), None).await.unwrap();
        assert_eq!(page.total, 0);

        let err = store
            .create_conversation(&NewConversation {
                user_id: Uuid::new_v4(),
                target_language: Language::Es,
                scenario_context: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn conversations_list_newest_first() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.ensure_user(user_id).await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let session = store
                .create_conversation(&NewConversation {
                    user_id,
                    target_language: Language::En,
                    scenario_context: Some("Job interview".into()),
                })
                .await
                .unwrap();
            ids.push(session.id);
        }

        let page = store
            .list_conversations(PageRequest::new(Some(1), Some(2)).unwrap(), Some(user_id))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }
}
